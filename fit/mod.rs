#![deny(dead_code)]
#![deny(unused_imports)]

pub mod basis;
pub mod config;
pub mod data;
pub mod estimate;
pub mod forecast;
pub mod layers;
pub mod link;
pub mod model;
pub mod normalize;
pub mod report;
pub mod solver;
pub mod types;
