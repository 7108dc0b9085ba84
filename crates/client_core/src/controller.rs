//! State and operations behind the tutor's course list screen.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::domain::{CourseFields, CourseId, CourseRegistration};
use tokio::{
    sync::watch,
    task::{AbortHandle, JoinError, JoinHandle},
};
use tracing::{debug, info, warn};

use crate::{
    api::CourseApi,
    error::ClientError,
    loading::LoadingState,
    notify::{Notification, NotificationSink},
    window::PagedCollection,
};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_LOAD_MORE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub page_size: usize,
    /// Artificial latency before each `load_more` reveals the next page.
    pub load_more_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            load_more_delay: DEFAULT_LOAD_MORE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseListSnapshot {
    pub window: Vec<CourseRegistration>,
    pub total: usize,
    pub page: usize,
    pub is_loading: bool,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Loaded(usize),
    Failed,
    /// A newer refresh started before this one resolved; its result was dropped.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    Appended(usize),
    Exhausted,
    AlreadyLoading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    Failed,
}

/// Handle to a controller task spawned with one of the `spawn_*` methods.
pub struct TaskHandle<T> {
    handle: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the task; `None` when it was cancelled.
    pub async fn join(self) -> Option<T> {
        match self.handle.await {
            Ok(value) => Some(value),
            Err(err) => {
                log_join_error(&err);
                None
            }
        }
    }
}

fn log_join_error(err: &JoinError) {
    if err.is_panic() {
        warn!(error = %err, "courses: controller task panicked");
    } else {
        debug!("courses: controller task cancelled");
    }
}

struct ListState {
    courses: PagedCollection<CourseRegistration>,
    is_loading: bool,
    refresh_generation: u64,
}

struct ControllerInner {
    api: Arc<dyn CourseApi>,
    notifier: Arc<dyn NotificationSink>,
    loading: LoadingState,
    config: ControllerConfig,
    state: Mutex<ListState>,
    snapshots: watch::Sender<CourseListSnapshot>,
}

pub struct CourseListController {
    inner: Arc<ControllerInner>,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl CourseListController {
    pub fn new(
        api: Arc<dyn CourseApi>,
        notifier: Arc<dyn NotificationSink>,
        loading: LoadingState,
        config: ControllerConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(CourseListSnapshot::default());
        Self {
            inner: Arc::new(ControllerInner {
                api,
                notifier,
                loading,
                state: Mutex::new(ListState {
                    courses: PagedCollection::new(config.page_size),
                    is_loading: false,
                    refresh_generation: 0,
                }),
                config,
                snapshots,
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CourseListSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> CourseListSnapshot {
        self.inner.snapshots.borrow().clone()
    }

    pub fn window(&self) -> Vec<CourseRegistration> {
        self.inner.lock_state().courses.window().to_vec()
    }

    /// Looks a course up in the full fetched collection, not just the window.
    pub fn find_course(&self, course_id: CourseId) -> Option<CourseRegistration> {
        self.inner
            .lock_state()
            .courses
            .all()
            .iter()
            .find(|course| course.course_id == course_id)
            .cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock_state().is_loading
    }

    pub fn loading_state(&self) -> &LoadingState {
        &self.inner.loading
    }

    pub async fn refresh_all(&self) -> RefreshOutcome {
        self.inner.refresh_all().await
    }

    pub async fn load_more(&self) -> LoadMoreOutcome {
        self.inner.load_more().await
    }

    pub async fn create_course(&self, fields: CourseFields) -> MutationOutcome {
        self.inner.create_course(fields).await
    }

    pub async fn update_course(&self, course_id: CourseId, fields: CourseFields) -> MutationOutcome {
        self.inner.update_course(course_id, fields).await
    }

    pub async fn delete_course(&self, course_id: CourseId) -> MutationOutcome {
        self.inner.delete_course(course_id).await
    }

    pub fn spawn_refresh_all(&self) -> TaskHandle<RefreshOutcome> {
        let inner = Arc::clone(&self.inner);
        self.spawn(async move { inner.refresh_all().await })
    }

    pub fn spawn_load_more(&self) -> TaskHandle<LoadMoreOutcome> {
        let inner = Arc::clone(&self.inner);
        self.spawn(async move { inner.load_more().await })
    }

    pub fn spawn_create_course(&self, fields: CourseFields) -> TaskHandle<MutationOutcome> {
        let inner = Arc::clone(&self.inner);
        self.spawn(async move { inner.create_course(fields).await })
    }

    pub fn spawn_update_course(
        &self,
        course_id: CourseId,
        fields: CourseFields,
    ) -> TaskHandle<MutationOutcome> {
        let inner = Arc::clone(&self.inner);
        self.spawn(async move { inner.update_course(course_id, fields).await })
    }

    pub fn spawn_delete_course(&self, course_id: CourseId) -> TaskHandle<MutationOutcome> {
        let inner = Arc::clone(&self.inner);
        self.spawn(async move { inner.delete_course(course_id).await })
    }

    /// Cancels every spawned task that is still running. A cancelled task
    /// never applies its result.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.lock_tasks());
        let running = tasks.iter().filter(|task| !task.is_finished()).count();
        for task in tasks {
            task.abort();
        }
        if running > 0 {
            info!(running, "courses: cancelled in-flight tasks");
        }
    }

    fn spawn<T, F>(&self, future: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.lock_tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle.abort_handle());
        TaskHandle { handle }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<AbortHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CourseListController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ControllerInner {
    fn lock_state(&self) -> MutexGuard<'_, ListState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &ListState) {
        self.snapshots.send_replace(CourseListSnapshot {
            window: state.courses.window().to_vec(),
            total: state.courses.all().len(),
            page: state.courses.pages(),
            is_loading: state.is_loading,
            has_more: state.courses.has_more(),
        });
    }

    async fn refresh_all(&self) -> RefreshOutcome {
        let generation = {
            let mut state = self.lock_state();
            state.refresh_generation += 1;
            state.refresh_generation
        };
        let _overlay = self.loading.begin();
        debug!(generation, "courses: refreshing");

        let fetched = self.api.list_tutor_courses().await;

        let mut state = self.lock_state();
        if state.refresh_generation != generation {
            debug!(generation, "courses: refresh superseded");
            return RefreshOutcome::Superseded;
        }
        match fetched {
            Ok(courses) => {
                let total = courses.len();
                state.courses.reset(courses);
                self.publish(&state);
                info!(total, "courses: refreshed");
                RefreshOutcome::Loaded(total)
            }
            Err(error) => {
                warn!(%error, "courses: refresh failed");
                state.courses.clear();
                self.publish(&state);
                RefreshOutcome::Failed
            }
        }
    }

    async fn load_more(&self) -> LoadMoreOutcome {
        {
            let mut state = self.lock_state();
            if state.is_loading {
                debug!("courses: load already in flight");
                return LoadMoreOutcome::AlreadyLoading;
            }
            state.is_loading = true;
            self.publish(&state);
        }
        let in_flight = InFlightLoad { inner: self, armed: true };

        tokio::time::sleep(self.config.load_more_delay).await;

        let revealed = in_flight.finish();
        if revealed == 0 {
            debug!("courses: no more courses to reveal");
            LoadMoreOutcome::Exhausted
        } else {
            debug!(revealed, "courses: revealed next page");
            LoadMoreOutcome::Appended(revealed)
        }
    }

    async fn create_course(&self, fields: CourseFields) -> MutationOutcome {
        let result = self.api.create_course(&fields).await;
        self.finish_mutation("create", result, "Course added successfully!")
            .await
    }

    async fn update_course(&self, course_id: CourseId, fields: CourseFields) -> MutationOutcome {
        let result = self.api.update_course(&fields, course_id).await;
        self.finish_mutation("update", result, "Course updated successfully!")
            .await
    }

    async fn delete_course(&self, course_id: CourseId) -> MutationOutcome {
        let result = self.api.delete_course(course_id).await;
        self.finish_mutation("delete", result, "Course deleted successfully!")
            .await
    }

    async fn finish_mutation(
        &self,
        action: &'static str,
        result: Result<(), ClientError>,
        success_message: &str,
    ) -> MutationOutcome {
        match result {
            Ok(()) => {
                info!(action, "courses: mutation applied");
                self.notifier
                    .notify(Notification::Success(success_message.to_string()));
                self.refresh_all().await;
                MutationOutcome::Applied
            }
            Err(error) => {
                warn!(action, %error, "courses: mutation failed");
                self.notifier
                    .notify(Notification::Error(user_message(&error)));
                MutationOutcome::Failed
            }
        }
    }
}

fn user_message(error: &ClientError) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        "Failed".to_string()
    } else {
        message
    }
}

/// Clears `is_loading` if a `load_more` is cancelled during its delay.
struct InFlightLoad<'a> {
    inner: &'a ControllerInner,
    armed: bool,
}

impl InFlightLoad<'_> {
    fn finish(mut self) -> usize {
        self.armed = false;
        let mut state = self.inner.lock_state();
        let revealed = state.courses.advance();
        state.is_loading = false;
        self.inner.publish(&state);
        revealed
    }
}

impl Drop for InFlightLoad<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.inner.lock_state();
            state.is_loading = false;
            self.inner.publish(&state);
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
