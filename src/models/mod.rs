pub mod assignment;
pub mod normalize;
pub mod position;
pub mod route;
