pub mod batch;
pub mod batch_reservation;
pub mod cart;
pub mod cart_item;
pub mod checkout_session;
pub mod order;
pub mod order_item;
pub mod product;
pub mod stock_movement;
