pub mod dense;
pub mod errors;
pub mod krylov;
pub mod parameters;
pub mod spectral;
pub mod structured;
