pub mod fit_null;
pub mod inputs;
pub mod scan;
