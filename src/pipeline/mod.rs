pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod confirm;
pub mod manifest;
pub mod pacing;
pub mod paths;
pub mod reconcile;
pub mod record;
pub mod replace;
pub mod util;
pub mod verify;
