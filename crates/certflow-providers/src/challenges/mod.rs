pub mod httpreq;

pub use httpreq::HttpReqSolver;
