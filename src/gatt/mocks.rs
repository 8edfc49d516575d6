//! Mocks of the collaborators the ranging engine talks to

pub mod mock_client;
pub mod mock_datastore;
