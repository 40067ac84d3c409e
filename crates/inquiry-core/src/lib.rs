pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod outcome;
pub mod params;
pub mod run;
pub mod scheduler;
pub mod series;
pub mod stats;
pub mod transport;
pub mod updates;

pub use cancel::*;
pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use executor::*;
pub use outcome::*;
pub use params::*;
pub use run::*;
pub use scheduler::*;
pub use series::*;
pub use stats::*;
pub use transport::*;
pub use updates::*;
