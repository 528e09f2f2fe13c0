pub mod bitflyer_api; // getboard snapshot client
pub mod board;
pub mod board_store; // reconciled board (snapshot + buffered diffs)
pub mod dispatch;
pub mod lightstream_ws; // Realtime API JSON-RPC client
