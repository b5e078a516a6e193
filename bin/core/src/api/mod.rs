//! Resolvers for the typed request surface in
//! [openstream_client::api]. The HTTP layer deserializes requests
//! and calls [resolver_api::Resolve] against [Args].

use std::sync::Arc;

use crate::{state::CoreState, tasks::TaskEngine};

mod execute;
mod read;
mod write;

pub struct Args {
  pub state: Arc<CoreState>,
  pub tasks: Arc<TaskEngine>,
}
