//! Tasks: the data model, explicit task operations and their REST routes.

pub mod model;
pub mod routes;
pub mod service;

pub use model::{Task, TaskFilter, TaskPage, TaskStats, TaskStatus, Urgency};
pub use routes::{TaskRouteState, task_routes};
pub use service::{ManualTaskOutcome, ManualTaskRequest, SendOutcome, TaskService};
