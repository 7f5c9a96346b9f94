//! Local JavaScript sandbox.
//!
//! Each call gets a brand new engine isolate on a dedicated worker thread;
//! nothing is shared between executions or with the host. A watchdog thread
//! enforces the wall-clock timeout by terminating the isolate, which is the
//! only way to stop a CPU-bound `while(true)` loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use deno_core::{JsRuntime, RuntimeOptions};
use serde::Deserialize;
use tracing::warn;

use crate::execution::ExecutionResult;

/// Hard wall-clock limit for one execution.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Heap ceiling per isolate; the near-heap-limit callback terminates a
/// runaway allocator before the engine's fatal out-of-memory path can abort
/// the host process.
const MAX_HEAP_BYTES: usize = 64 * 1024 * 1024;

/// Installs the console-capture shim and strips host bindings from the
/// global scope. User code sees only what the shim hands it.
const BOOTSTRAP: &str = r#"
((globalThis) => {
    const logs = [];
    const errors = [];
    // Only log pretty-prints objects; warn and error plain-coerce.
    const pretty = (args) => args.map((arg) => {
        if (typeof arg === "object" && arg !== null) {
            try { return JSON.stringify(arg, null, 2); } catch (_) { return String(arg); }
        }
        return String(arg);
    }).join(" ");
    const plain = (args) => args.map((arg) => String(arg)).join(" ");
    globalThis.__console = {
        log: (...args) => { logs.push(pretty(args)); },
        warn: (...args) => { logs.push("[WARN] " + plain(args)); },
        error: (...args) => { errors.push(plain(args)); },
    };
    globalThis.__collect = () => JSON.stringify({
        output: logs.join("\n"),
        errors: errors.join("\n"),
    });
    delete globalThis.Deno;
})(globalThis);
"#;

/// Run untrusted JavaScript in a fresh sandbox. Resolves, never rejects:
/// timeouts, exceptions and worker failures all come back as failed results.
pub async fn run_local(code: &str) -> ExecutionResult {
    run_local_with_timeout(code, EXECUTION_TIMEOUT).await
}

/// Same as [`run_local`] with an explicit timeout, so tests can exercise the
/// watchdog without waiting the full five seconds.
pub async fn run_local_with_timeout(code: &str, timeout: Duration) -> ExecutionResult {
    let code = code.to_string();
    let (tx, rx) = tokio::sync::oneshot::channel();

    // V8 isolates are !Send; the whole execution lives on its own thread.
    std::thread::spawn(move || {
        let result = run_in_worker(&code, timeout);
        if tx.send(result).is_err() {
            warn!("sandbox result receiver dropped");
        }
    });

    match rx.await {
        Ok(result) => result,
        Err(_) => ExecutionResult::failure("Sandbox worker panicked", 0),
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: deno_core::v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Invoked by the engine as the heap approaches its limit. Terminates the
/// execution and grants a grace allocation so the termination can propagate
/// instead of hitting the fatal out-of-memory handler, which would abort the
/// whole process.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points to the `HeapLimitState` boxed in `run_in_worker`,
    // which outlives every script execution on this isolate. `triggered` is
    // atomic, so a shared reference suffices.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

fn run_in_worker(code: &str, timeout: Duration) -> ExecutionResult {
    let start = Instant::now();

    let mut runtime = JsRuntime::new(RuntimeOptions {
        create_params: Some(deno_core::v8::CreateParams::default().heap_limits(0, MAX_HEAP_BYTES)),
        ..Default::default()
    });

    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    if let Err(e) = runtime.execute_script("[playground:bootstrap]", BOOTSTRAP) {
        return ExecutionResult::failure(
            format!("Sandbox bootstrap failed: {e}"),
            start.elapsed().as_millis() as u64,
        );
    }

    // The user's source becomes the body of a constructed function whose
    // only parameter is the console shim.
    let encoded = match serde_json::to_string(code) {
        Ok(encoded) => encoded,
        Err(e) => {
            return ExecutionResult::failure(
                format!("Sandbox bootstrap failed: {e}"),
                start.elapsed().as_millis() as u64,
            )
        }
    };
    let script = format!("(new Function('console', {encoded}))(globalThis.__console);");

    // Watchdog: if the timeout elapses before the cancel signal arrives,
    // terminate the isolate. Termination makes execute_script return an
    // error and discards whatever the sandbox had buffered.
    let handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_timed_out = timed_out.clone();
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
    let watchdog = std::thread::spawn(move || {
        if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            watchdog_timed_out.store(true, Ordering::SeqCst);
            handle.terminate_execution();
        }
    });

    let exec_error = runtime
        .execute_script("[playground:user]", script)
        .err()
        .map(|e| e.to_string());

    let _ = cancel_tx.send(());
    let _ = watchdog.join();

    if heap_state.triggered.load(Ordering::SeqCst) {
        return ExecutionResult::failure(
            format!(
                "Memory limit exceeded ({} MB)",
                MAX_HEAP_BYTES / 1024 / 1024
            ),
            start.elapsed().as_millis() as u64,
        );
    }

    if timed_out.load(Ordering::SeqCst) {
        return ExecutionResult::failure(
            format!("Execution timeout ({} seconds)", timeout.as_secs_f32()),
            timeout.as_millis() as u64,
        );
    }

    let (output, console_errors) = collect_output(&mut runtime);
    let execution_time_ms = start.elapsed().as_millis() as u64;

    match exec_error {
        Some(message) => ExecutionResult {
            success: false,
            output,
            error: Some(message),
            execution_time_ms,
        },
        None => ExecutionResult {
            success: true,
            output,
            error: (!console_errors.is_empty()).then_some(console_errors),
            execution_time_ms,
        },
    }
}

#[derive(Debug, Default, Deserialize)]
struct CapturedOutput {
    #[serde(default)]
    output: String,
    #[serde(default)]
    errors: String,
}

/// Read back whatever the console shim buffered. Works after an uncaught
/// exception too, which is how partial output survives a throw.
fn collect_output(runtime: &mut JsRuntime) -> (String, String) {
    let global = match runtime.execute_script("[playground:collect]", "globalThis.__collect()") {
        Ok(global) => global,
        Err(e) => {
            warn!(error = %e, "failed to read sandbox console buffers");
            return (String::new(), String::new());
        }
    };

    let scope = &mut runtime.handle_scope();
    let local = deno_core::v8::Local::new(scope, global);
    let raw = local.to_rust_string_lossy(scope);

    let captured: CapturedOutput = serde_json::from_str(&raw).unwrap_or_default();
    (captured.output, captured.errors)
}
