use std::sync::Arc;

use crate::core::planner::WorkflowPlanner;
use crate::core::progress_stream::ProgressStream;
use crate::core::store::JobStore;
use crate::core::worker::WorkerPool;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub pool: Arc<WorkerPool>,
    pub planner: Arc<WorkflowPlanner>,
    pub progress: Arc<ProgressStream>,
}
