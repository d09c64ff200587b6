pub mod debounce;
pub mod timing;
