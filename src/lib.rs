pub mod config;
pub mod contacts;
pub mod coordinates;
pub mod desktop;
pub mod driver;
pub mod hotkeys;
pub mod locate;
pub mod logging;
pub mod matcher;
pub mod recorder;
pub mod sampler;
pub mod similarity;

#[cfg(test)]
mod testing;
