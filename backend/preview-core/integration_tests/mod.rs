mod helpers;
mod previewer;
mod transport;
