//! Task execution.
//!
//! A [`Task`] is one named executable unit inside a loaded package. It
//! owns an input [`ParameterSet`], mutable until execution starts, and
//! runs over the package's IPC channel either synchronously
//! ([`execute_sync`]) or asynchronously ([`execute_async`] plus
//! [`wait`]). Output parameters stream back one at a time; callbacks
//! registered against name patterns fire in registration order as each
//! record arrives, before the execution is reported terminal.
//!
//! The status machine is `Created → (Running | Pending) → {Done,
//! Error}`. Terminal states are sticky: a finished task keeps its
//! stored result forever and a fresh task must be obtained to re-run.
//!
//! [`execute_sync`]: Task::execute_sync
//! [`execute_async`]: Task::execute_async
//! [`wait`]: Task::wait

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use glob::Pattern;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::package::{Channel, ChannelGuard};
use crate::types::param::{Param, ParamValue};
use crate::types::protocol::{ExecuteParams, PackageRequest, PackageResponse, TaskInfo};
use crate::types::pset::ParameterSet;

/// Execution status of a task.
///
/// `Created` is the state after discovery, before any execution.
/// `Pending` means an asynchronous execution was requested but the
/// background worker has not started the exchange yet; `Running` means
/// the exchange is in flight. `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStatus {
    /// Input parameters may be freely mutated.
    Created,
    /// Asynchronous execution queued, exchange not started.
    Pending,
    /// Exchange in flight on the package channel.
    Running,
    /// Finished successfully; the output set is stored.
    Done,
    /// Finished with a failure; the error is stored.
    Error,
}

impl ExecStatus {
    /// Whether this status is terminal (`Done` or `Error`).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Done => write!(f, "Done"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Handler invoked for each matching output parameter as it arrives.
type Callback = Box<dyn FnMut(&Param) + Send>;

/// Status and stored outcome, shared with the background worker of an
/// asynchronous execution.
#[derive(Debug)]
struct ExecState {
    status: watch::Sender<ExecStatus>,
    outcome: RwLock<Option<Result<ParameterSet>>>,
}

impl ExecState {
    fn new() -> Arc<Self> {
        let (status, _) = watch::channel(ExecStatus::Created);
        Arc::new(Self {
            status,
            outcome: RwLock::new(None),
        })
    }

    fn set_status(&self, status: ExecStatus) {
        self.status.send_replace(status);
    }

    /// Stores the outcome, then flips to the terminal status. The
    /// ordering guarantees any observer that sees a terminal status
    /// also sees the outcome.
    fn finish(&self, result: Result<ParameterSet>) {
        let terminal = if result.is_ok() {
            ExecStatus::Done
        } else {
            ExecStatus::Error
        };
        *self.outcome.write() = Some(result);
        self.status.send_replace(terminal);
    }

    fn stored(&self) -> Result<ParameterSet> {
        self.outcome
            .read()
            .clone()
            .expect("terminal task has a stored outcome")
    }
}

/// A named executable unit of a loaded package.
///
/// Obtained from [`Package::task`](crate::Package::task) or
/// [`Package::task_list`](crate::Package::task_list); bound to the
/// package's one live subprocess channel for its whole lifetime.
///
/// # Examples
///
/// ```rust,no_run
/// # async fn example(package: votask::Package) -> votask::Result<()> {
/// let mut task = package.task("voregistry")?;
/// task.set_value("searchTerm", "quasar")?;
/// let results = task.execute_sync().await?;
/// for (name, value) in results.param_list(Some("result"))? {
///     println!("{name}: {value:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct Task {
    name: String,
    package: String,
    description: String,
    input: ParameterSet,
    callbacks: Vec<(Pattern, Callback)>,
    channel: Arc<Channel>,
    state: Arc<ExecState>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("package", &self.package)
            .field("status", &self.status())
            .field("input", &self.input)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Task {
    pub(crate) fn new(info: TaskInfo, package: String, channel: Arc<Channel>) -> Self {
        let mut input = info.params;
        if input.name().is_empty() {
            input.set_name(format!("{}.in", info.name));
        }
        input.set_provenance(package.clone(), info.name.clone());
        Self {
            name: info.name,
            package,
            description: info.description,
            input,
            callbacks: Vec::new(),
            channel,
            state: ExecState::new(),
        }
    }

    /// The task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning package name.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The task description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The task attributes as a field-name keyed map.
    pub fn attrs(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        map.insert("name", self.name.clone());
        map.insert("package", self.package.clone());
        map.insert("description", self.description.clone());
        map.insert("status", self.status().to_string());
        map
    }

    /// Read access to the input parameter set.
    pub fn params(&self) -> &ParameterSet {
        &self.input
    }

    /// Non-blocking snapshot of the execution status.
    pub fn status(&self) -> ExecStatus {
        *self.state.status.borrow()
    }

    /// Sets the value of one existing input parameter.
    ///
    /// # Errors
    ///
    /// [`Error::TaskParameter`] once execution has started,
    /// [`Error::NotFound`] for an unknown name, [`Error::TypeMismatch`]
    /// for a value of the wrong kind.
    pub fn set_value(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<()> {
        self.ensure_mutable()?;
        self.input.get_param_mut(name)?.set_value(value)
    }

    /// Merges matching-named parameters from `pset` into the input set
    /// by value; names not already present are added as new
    /// parameters.
    ///
    /// # Errors
    ///
    /// [`Error::TaskParameter`] once execution has started, or when a
    /// merged value's kind mismatches the declared kind of the
    /// existing parameter of that name.
    pub fn set_params(&mut self, pset: &ParameterSet) -> Result<()> {
        self.ensure_mutable()?;
        for incoming in pset {
            if self.input.contains(incoming.name()) {
                let existing = self.input.get_param_mut(incoming.name())?;
                if existing.kind() != incoming.kind() {
                    return Err(Error::TaskParameter {
                        task: self.name.clone(),
                        message: format!(
                            "parameter {} is declared {}, not {}",
                            incoming.name(),
                            existing.kind(),
                            incoming.kind()
                        ),
                    });
                }
                if let Some(value) = incoming.value() {
                    existing.set_value(value.clone()).map_err(|e| {
                        Error::TaskParameter {
                            task: self.name.clone(),
                            message: e.to_string(),
                        }
                    })?;
                }
                if let Some(encoding) = incoming.encoding() {
                    existing.set_encoding(encoding);
                }
            } else {
                self.input.add(incoming.clone())?;
            }
        }
        Ok(())
    }

    /// Registers a handler invoked once per output parameter whose
    /// name matches the glob `pattern`, as results stream back. All
    /// matching callbacks fire in registration order for each matching
    /// parameter, before the execution is reported terminal.
    ///
    /// # Errors
    ///
    /// [`Error::TaskParameter`] once execution has started,
    /// [`Error::InvalidPattern`] for a bad glob.
    pub fn set_callback<F>(&mut self, pattern: &str, func: F) -> Result<()>
    where
        F: FnMut(&Param) + Send + 'static,
    {
        self.ensure_mutable()?;
        let compiled = Pattern::new(pattern).map_err(|e| Error::invalid_pattern(pattern, &e))?;
        self.callbacks.push((compiled, Box::new(func)));
        Ok(())
    }

    /// Executes the task, blocking until the subprocess signals
    /// completion or failure.
    ///
    /// Input validation happens before any subprocess round-trip; a
    /// validation failure surfaces as [`Error::TaskParameter`] with no
    /// channel traffic. Runtime failures reported by the subprocess
    /// (including its unexpected termination) surface as
    /// [`Error::TaskExecution`] and leave the task in `Error`.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelBusy`] if another execution currently owns the
    /// package channel; the task stays `Created` and may be retried.
    pub async fn execute_sync(&mut self) -> Result<ParameterSet> {
        self.ensure_runnable()?;
        if let Err(e) = self.validated_input() {
            self.state.finish(Err(e.clone()));
            return Err(e);
        }

        // Exclusive channel ownership for the whole exchange.
        let guard = self.channel.try_acquire()?;
        self.state.set_status(ExecStatus::Running);
        tracing::debug!(task = %self.name, package = %self.package, "task dispatched");

        let mut callbacks = std::mem::take(&mut self.callbacks);
        let result = exchange(
            guard,
            self.name.clone(),
            self.package.clone(),
            self.input.clone(),
            &mut callbacks,
        )
        .await;
        self.state.finish(result.clone());
        result
    }

    /// Starts the task asynchronously and returns immediately; the
    /// exchange proceeds on a background worker that owns the channel
    /// until the task reaches a terminal state. Poll with
    /// [`status`](Self::status), synchronize with [`wait`](Self::wait).
    ///
    /// # Errors
    ///
    /// [`Error::ChannelBusy`] if another execution currently owns the
    /// package channel; the task stays `Created` and may be retried.
    pub fn execute_async(&mut self) -> Result<()> {
        self.ensure_runnable()?;
        let guard = self.channel.try_acquire()?;
        self.state.set_status(ExecStatus::Pending);

        let state = Arc::clone(&self.state);
        let task = self.name.clone();
        let package = self.package.clone();
        let input = self.input.clone();
        let mut callbacks = std::mem::take(&mut self.callbacks);

        tokio::spawn(async move {
            let result = run_background(guard, task, package, input, &mut callbacks, &state).await;
            state.finish(result);
        });
        Ok(())
    }

    /// Blocks until a started task reaches `Done` or `Error`, then
    /// returns the stored output set or the stored error. On an
    /// already-terminal task this returns immediately with the same
    /// stored result; the subprocess is never re-invoked.
    ///
    /// # Errors
    ///
    /// [`Error::TaskExecution`] if the task was never started, plus
    /// whatever the execution itself stored.
    pub async fn wait(&self) -> Result<ParameterSet> {
        let mut rx = self.state.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            match status {
                ExecStatus::Created => {
                    return Err(Error::TaskExecution {
                        task: self.name.clone(),
                        status: -1,
                        message: "task has not been started".to_string(),
                    })
                }
                s if s.is_terminal() => return self.state.stored(),
                _ => {
                    if rx.changed().await.is_err() {
                        // Sender gone; the stored outcome (if any) is final.
                        return self.state.stored();
                    }
                }
            }
        }
    }

    /// Input mutation is only legal before execution starts.
    fn ensure_mutable(&self) -> Result<()> {
        let status = self.status();
        if status == ExecStatus::Created {
            Ok(())
        } else {
            Err(Error::TaskParameter {
                task: self.name.clone(),
                message: format!("input parameters are frozen (task is {status})"),
            })
        }
    }

    /// Execution is only legal once, from `Created`.
    fn ensure_runnable(&self) -> Result<()> {
        let status = self.status();
        if status == ExecStatus::Created {
            Ok(())
        } else {
            Err(Error::TaskExecution {
                task: self.name.clone(),
                status: -1,
                message: format!(
                    "task is {status}; obtain a fresh task from the package to re-run"
                ),
            })
        }
    }

    /// Validates the input set against declared kinds, mapping any
    /// violation to [`Error::TaskParameter`].
    fn validated_input(&self) -> Result<()> {
        self.input.validate().map_err(|e| Error::TaskParameter {
            task: self.name.clone(),
            message: e.to_string(),
        })
    }
}

/// Background half of an asynchronous execution: validate, mark
/// running, run the exchange.
async fn run_background(
    guard: ChannelGuard,
    task: String,
    package: String,
    input: ParameterSet,
    callbacks: &mut Vec<(Pattern, Callback)>,
    state: &ExecState,
) -> Result<ParameterSet> {
    // Still no subprocess round-trip before validation.
    input.validate().map_err(|e| Error::TaskParameter {
        task: task.clone(),
        message: e.to_string(),
    })?;
    state.set_status(ExecStatus::Running);
    tracing::debug!(task = %task, package = %package, "task dispatched (async)");
    exchange(guard, task, package, input, callbacks).await
}

/// One execute exchange: send the input set, consume the response
/// stream until the terminating status record.
async fn exchange(
    mut guard: ChannelGuard,
    task: String,
    package: String,
    input: ParameterSet,
    callbacks: &mut [(Pattern, Callback)],
) -> Result<ParameterSet> {
    guard
        .send(PackageRequest::Execute(ExecuteParams {
            task: task.clone(),
            pset: input,
        }))
        .await?;

    let mut output = ParameterSet::for_task(
        format!("{task}.out"),
        package,
        task.clone(),
        "task output parameters",
    );

    loop {
        match guard.receive().await {
            Ok(PackageResponse::Param(param)) => {
                for (pattern, callback) in callbacks.iter_mut() {
                    if pattern.matches(param.name()) {
                        callback(&param);
                    }
                }
                // Result streams may repeat a name; keep every record.
                output.push(param);
            }
            Ok(PackageResponse::Status(status)) if status.is_ok() => {
                tracing::debug!(task = %task, params = output.len(), "task completed");
                return Ok(output);
            }
            Ok(PackageResponse::Status(status)) => {
                return Err(Error::TaskExecution {
                    task,
                    status: status.status,
                    message: status
                        .msg
                        .unwrap_or_else(|| "task reported failure".to_string()),
                });
            }
            Ok(PackageResponse::Manifest(_)) => {
                return Err(Error::Protocol(
                    "unexpected manifest frame in execute stream".to_string(),
                ));
            }
            Err(Error::ChannelClosed) => {
                return Err(Error::TaskExecution {
                    task,
                    status: -1,
                    message: "package subprocess terminated before signalling completion"
                        .to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Package;
    use crate::shared::testing::{RequestLog, ScriptedTransport};
    use crate::types::param::ParamKind;
    use crate::types::protocol::{PackageManifest, StatusRecord};
    use std::sync::Mutex;
    use std::time::Duration;

    fn manifest() -> PackageManifest {
        serde_json::from_value(serde_json::json!({
            "name": "vo-cli",
            "tasks": [{
                "name": "voregistry",
                "description": "registry keyword search",
                "params": {
                    "name": "voregistry.in",
                    "params": [
                        {"name": "searchTerm", "kind": "string", "description": "search term"},
                    ],
                },
            }],
        }))
        .unwrap()
    }

    fn result_param(value: &str) -> PackageResponse {
        let mut param = Param::new("result", ParamKind::String, "matched resource");
        param.set_value(value).unwrap();
        PackageResponse::Param(param)
    }

    fn msg_param(value: &str) -> PackageResponse {
        let mut param = Param::new("msg", ParamKind::String, "");
        param.set_value(value).unwrap();
        PackageResponse::Param(param)
    }

    /// Loads the one-task package over a script whose first frame is
    /// the discovery manifest.
    async fn load_task(script: Vec<PackageResponse>) -> (Task, RequestLog) {
        let mut frames = vec![PackageResponse::Manifest(manifest())];
        frames.extend(script);
        let transport = ScriptedTransport::new(frames);
        let log = transport.log();
        let package = Package::load(Box::new(transport), Duration::from_secs(1))
            .await
            .unwrap();
        (package.task("voregistry").unwrap(), log)
    }

    #[tokio::test]
    async fn sync_execution_returns_streamed_output() {
        let (mut task, log) = load_task(vec![
            result_param("ivo://quasar/a"),
            result_param("ivo://quasar/b"),
            PackageResponse::Status(StatusRecord::ok()),
        ])
        .await;

        task.set_value("searchTerm", "quasar").unwrap();
        let output = task.execute_sync().await.unwrap();

        assert_eq!(task.status(), ExecStatus::Done);
        let results = output.param_set(Some("result")).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(output.package(), Some("vo-cli"));
        assert_eq!(output.task(), Some("voregistry"));

        // Discovery plus exactly one execute request.
        let requests = log.requests();
        assert_eq!(requests.len(), 2);
        assert!(matches!(requests[1], PackageRequest::Execute(_)));
    }

    #[tokio::test]
    async fn callbacks_fire_in_registration_order() {
        let (mut task, _log) = load_task(vec![
            msg_param("first"),
            result_param("ivo://x"),
            msg_param("second"),
            PackageResponse::Status(StatusRecord::ok()),
        ])
        .await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&seen);
        task.set_callback("msg", move |p| {
            a.lock().unwrap().push(format!("msg-cb:{:?}", p.value()));
        })
        .unwrap();
        let b = Arc::clone(&seen);
        task.set_callback("*", move |p| {
            b.lock().unwrap().push(format!("any-cb:{}", p.name()));
        })
        .unwrap();

        task.execute_sync().await.unwrap();

        let seen = seen.lock().unwrap();
        // Per arriving param: the "msg" callback (registered first)
        // fires before the match-all one; "result" only hits the
        // match-all callback.
        assert_eq!(seen.len(), 5);
        assert!(seen[0].starts_with("msg-cb:"));
        assert_eq!(seen[1], "any-cb:msg");
        assert_eq!(seen[2], "any-cb:result");
        assert!(seen[3].starts_with("msg-cb:"));
        assert_eq!(seen[4], "any-cb:msg");
    }

    #[tokio::test]
    async fn invalid_input_fails_before_any_channel_traffic() {
        let (mut task, log) = load_task(vec![]).await;

        // Forge a kind-violating input through the merge path.
        let mut bad = ParameterSet::new("bad");
        let forged: Param = serde_json::from_value(serde_json::json!({
            "name": "searchTerm",
            "kind": "string",
            "value": {"int": 7},
        }))
        .unwrap();
        bad.push(forged);
        // The merge itself rejects the mismatched value.
        let err = task.set_params(&bad).unwrap_err();
        assert!(matches!(err, Error::TaskParameter { .. }));

        // Force it past the setter the way a hand-built template
        // could, then execute.
        let forged: TaskInfo = serde_json::from_value(serde_json::json!({
            "name": "voregistry",
            "params": {
                "name": "voregistry.in",
                "params": [
                    {"name": "searchTerm", "kind": "string", "value": {"int": 7}},
                ],
            },
        }))
        .unwrap();
        let mut task = Task::new(forged, "vo-cli".to_string(), {
            // Reuse the loaded package's channel via the existing task.
            Arc::clone(&task.channel)
        });
        let err = task.execute_sync().await.unwrap_err();
        assert!(matches!(err, Error::TaskParameter { .. }));
        assert_eq!(task.status(), ExecStatus::Error);

        // Only the discovery request ever reached the channel.
        assert_eq!(log.len(), 1);

        // wait() reproduces the stored parameter error.
        let err = task.wait().await.unwrap_err();
        assert!(matches!(err, Error::TaskParameter { .. }));
    }

    #[tokio::test]
    async fn subprocess_failure_surfaces_status_and_message() {
        let (mut task, _log) = load_task(vec![
            msg_param("partial output"),
            PackageResponse::Status(StatusRecord::error(139, "segmentation fault")),
        ])
        .await;

        let err = task.execute_sync().await.unwrap_err();
        match err {
            Error::TaskExecution {
                status, message, ..
            } => {
                assert_eq!(status, 139);
                assert_eq!(message, "segmentation fault");
            }
            other => panic!("expected TaskExecution, got: {other}"),
        }
        assert_eq!(task.status(), ExecStatus::Error);
    }

    #[tokio::test]
    async fn crashed_subprocess_resolves_to_error() {
        // Script ends without a status record: the channel reports
        // closed mid-stream, like a binary that segfaulted.
        let (mut task, _log) = load_task(vec![result_param("ivo://x")]).await;

        let err = task.execute_sync().await.unwrap_err();
        assert!(matches!(
            err,
            Error::TaskExecution { status: -1, .. }
        ));
        assert_eq!(task.status(), ExecStatus::Error);
    }

    #[tokio::test]
    async fn async_execution_pends_then_completes() {
        let (mut task, _log) = load_task(vec![
            result_param("ivo://quasar/a"),
            PackageResponse::Status(StatusRecord::ok()),
        ])
        .await;
        task.set_value("searchTerm", "quasar").unwrap();

        task.execute_async().unwrap();
        let status = task.status();
        assert!(
            matches!(status, ExecStatus::Pending | ExecStatus::Running),
            "status immediately after dispatch was {status}"
        );

        let output = task.wait().await.unwrap();
        assert_eq!(task.status(), ExecStatus::Done);
        assert_eq!(output.param_set(Some("result")).unwrap().len(), 1);

        // A second wait returns the identical stored result without
        // another subprocess exchange.
        let again = task.wait().await.unwrap();
        assert_eq!(again, output);
    }

    #[tokio::test]
    async fn busy_channel_rejects_concurrent_execution() {
        let (mut task, _log) = load_task(vec![]).await;
        // Hold the channel the way an outstanding execution would.
        let _guard = task.channel.try_acquire().unwrap();

        let err = task.execute_sync().await.unwrap_err();
        assert!(matches!(err, Error::ChannelBusy));
        // The task was not consumed; it can run once the channel frees.
        assert_eq!(task.status(), ExecStatus::Created);

        let err = task.execute_async().unwrap_err();
        assert!(matches!(err, Error::ChannelBusy));
    }

    #[tokio::test]
    async fn terminal_task_cannot_rerun_or_mutate() {
        let (mut task, _log) =
            load_task(vec![PackageResponse::Status(StatusRecord::ok())]).await;
        task.execute_sync().await.unwrap();

        let err = task.execute_sync().await.unwrap_err();
        assert!(matches!(err, Error::TaskExecution { .. }));

        let err = task.set_value("searchTerm", "crab").unwrap_err();
        assert!(matches!(err, Error::TaskParameter { .. }));

        let err = task.set_callback("*", |_| {}).unwrap_err();
        assert!(matches!(err, Error::TaskParameter { .. }));
    }

    #[tokio::test]
    async fn wait_on_unstarted_task_errors() {
        let (task, _log) = load_task(vec![]).await;
        let err = task.wait().await.unwrap_err();
        assert!(matches!(err, Error::TaskExecution { .. }));
    }

    #[tokio::test]
    async fn set_params_merges_and_appends() {
        let (mut task, _log) = load_task(vec![]).await;

        let mut extra = ParameterSet::new("overrides");
        extra
            .add_param("searchTerm", ParamKind::String, "")
            .unwrap()
            .set_value("quasar")
            .unwrap();
        extra
            .add_param("maxRecords", ParamKind::Int, "record cap")
            .unwrap()
            .set_value(50i64)
            .unwrap();

        task.set_params(&extra).unwrap();
        assert_eq!(
            task.params()
                .get_param("searchTerm")
                .unwrap()
                .value()
                .unwrap(),
            &ParamValue::from("quasar")
        );
        assert!(task.params().contains("maxRecords"));

        // Declared-kind conflict for an existing name is rejected.
        let mut wrong = ParameterSet::new("wrong");
        wrong
            .add_param("searchTerm", ParamKind::Int, "")
            .unwrap()
            .set_value(3i64)
            .unwrap();
        let err = task.set_params(&wrong).unwrap_err();
        assert!(matches!(err, Error::TaskParameter { .. }));
    }
}
