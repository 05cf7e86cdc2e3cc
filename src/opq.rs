//! OPQ 平台侧：接口调用、推送事件结构与 socket.io 连接

pub mod api;
pub mod model;
pub mod socket;
