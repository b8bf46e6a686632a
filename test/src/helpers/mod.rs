
pub use mock_transport::{MockTransport, Reply};
pub use setup::{
    on, past_batch_window, test_config, test_dispatcher, test_dispatcher_with_flag, TEST_API_BASE,
};
