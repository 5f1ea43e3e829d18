pub mod availability;
pub mod calendar;
pub mod effects;
pub mod gateway;
pub mod lifecycle;
pub mod messaging;
pub mod payments;
pub mod scheduling;
pub mod sweeper;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;
