// Core stock services
pub mod allocation;
pub mod batches;
pub mod reservations;
pub mod stock_movements;

// Order lifecycle and checkout
pub mod checkout;
pub mod orders;

// Background sweeps
pub mod maintenance;
