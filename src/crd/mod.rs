mod kibana;

pub use kibana::*;
