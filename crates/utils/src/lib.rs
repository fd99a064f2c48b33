pub mod logging;
pub mod noise;
pub mod response;
