//! Client side of the tutor course list: REST client, list controller and
//! the small UI-facing collaborators (notifications, loading overlay).

pub mod api;
pub mod controller;
pub mod error;
pub mod loading;
pub mod notify;
pub mod window;

pub use api::{CourseApi, HttpCourseApi};
pub use controller::{
    ControllerConfig, CourseListController, CourseListSnapshot, LoadMoreOutcome, MutationOutcome,
    RefreshOutcome, TaskHandle, DEFAULT_LOAD_MORE_DELAY, DEFAULT_PAGE_SIZE,
};
pub use error::ClientError;
pub use loading::LoadingState;
pub use notify::{BroadcastNotifier, Notification, NotificationSink};
