pub mod detection;
pub mod frame;
pub mod geometry;
pub mod io;
pub mod system;

#[cfg(test)]
mod test_utils;
