mod config;
mod previewer;
mod transport;
