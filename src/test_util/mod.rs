pub mod simulated_network;
pub mod tracking_sender;
