pub mod cmd;
pub mod control;
pub mod create;
pub mod destroy;
pub mod logs;
pub mod ls;
pub mod pkg;
