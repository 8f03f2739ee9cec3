pub mod relay;
pub mod toast;
