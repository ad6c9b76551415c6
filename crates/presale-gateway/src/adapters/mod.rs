pub mod coinpayments;
pub mod sandbox;
