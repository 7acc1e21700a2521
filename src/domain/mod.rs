pub mod card;
pub mod event;
pub mod invoice;
pub mod parameter;
pub mod payment_method;
pub mod ports;
