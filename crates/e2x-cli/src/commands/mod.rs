pub mod explain;
pub mod methods;
pub mod segment;
