pub mod architecture;
pub mod cadence;
pub mod checkpoint;
pub mod constants;
pub mod data;
pub mod losses;
pub mod optim;
pub mod schedule;
pub mod training;

#[cfg(test)]
pub(crate) mod testing;
