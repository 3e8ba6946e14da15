mod exception_details;
mod messages;
