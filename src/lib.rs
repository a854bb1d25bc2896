#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

#[path = "../fit/mod.rs"]
pub mod fit;
