pub mod recv;
pub mod send;

pub use recv::ReceiveWindow;
pub use send::SendWindow;
