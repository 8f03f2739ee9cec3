pub mod call_list;
pub mod live_view;
pub mod upload;
