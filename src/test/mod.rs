pub mod utils;

mod ai;
mod content;
