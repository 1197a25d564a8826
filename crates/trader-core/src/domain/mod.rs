//! 리스크 엔진이 다루는 도메인 모델.

mod observation;
mod position;
mod position_host;
mod side;

pub use observation::*;
pub use position::*;
pub use position_host::*;
pub use side::*;
