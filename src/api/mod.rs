pub mod jupiter;

pub use jupiter::{JupiterClient, Quote, UnsignedSwap};
