pub mod admission;
pub mod checkpoint;
pub mod config;
pub mod persistence;
pub mod resources;
pub mod run;
pub mod shared;
pub mod tier;
pub mod workflow;
