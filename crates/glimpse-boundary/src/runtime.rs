//! V8 render runtime.
//!
//! V8 isolates are `!Send`, so every render gets a dedicated thread with its
//! own current-thread tokio runtime and a fresh [`JsRuntime`]. A watchdog
//! thread terminates execution once the CPU budget is spent and a
//! near-heap-limit callback stops runaway allocation before V8 aborts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use glimpse_sandbox::COMPONENT_NAME;
use serde_json::Value;

use crate::error::BoundaryError;
use crate::ops::{glimpse_ext, RenderResult};
use crate::transpile::transpile;

/// Resource limits for one render.
#[derive(Debug, Clone)]
pub struct RenderLimits {
    /// CPU budget for the whole render.
    pub timeout: Duration,
    /// V8 heap limit in bytes.
    pub max_heap_size: usize,
    /// Largest markup returned to the host.
    pub max_output_size: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            max_heap_size: 64 * 1024 * 1024,
            max_output_size: 1024 * 1024,
        }
    }
}

impl RenderLimits {
    /// Apply `--timeout-ms`, `--max-heap-mb` and `--max-output-kb` flags.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut limits = Self::default();
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            let value = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("{flag} needs a value"))?;
            let n: u64 = value
                .parse()
                .map_err(|_| anyhow::anyhow!("{flag}: '{value}' is not a number"))?;
            if n == 0 {
                anyhow::bail!("{flag} must be greater than 0");
            }
            match flag.as_str() {
                "--timeout-ms" => limits.timeout = Duration::from_millis(n),
                "--max-heap-mb" => limits.max_heap_size = n as usize * 1024 * 1024,
                "--max-output-kb" => limits.max_output_size = n as usize * 1024,
                other => anyhow::bail!("unknown flag '{other}'"),
            }
        }
        Ok(limits)
    }
}

/// Render `code` against `data` and return the markup.
///
/// The JSX is lowered first so syntax errors never reach V8.
pub async fn render(
    code: String,
    data: Value,
    limits: RenderLimits,
) -> Result<String, BoundaryError> {
    let compiled = transpile(&code)?;
    let data_literal = serde_json::to_string(&serde_json::to_string(&data)?)?;
    let script = format!(
        "__glimpseRender(() => {{\n{compiled}\nreturn {COMPONENT_NAME};\n}}, {data_literal});"
    );

    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::Builder::new()
        .name("glimpse-render".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = tx.send(Err(BoundaryError::Thread(e.to_string())));
                    return;
                }
            };
            let result = rt.block_on(run_script(script, &limits));
            if tx.send(result).is_err() {
                tracing::warn!("render result receiver dropped");
            }
        })
        .map_err(|e| BoundaryError::Thread(e.to_string()))?;

    rx.await
        .map_err(|_| BoundaryError::Thread("render thread panicked".into()))?
}

struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points at the boxed HeapLimitState owned by
    // `run_script`, which outlives the isolate's event loop.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    // 1 MB grace so termination can propagate.
    current_heap_limit + 1024 * 1024
}

fn create_runtime(max_heap_size: usize) -> JsRuntime {
    let create_params = v8::CreateParams::default().heap_limits(0, max_heap_size);
    JsRuntime::new(RuntimeOptions {
        extensions: vec![glimpse_ext::init()],
        create_params: Some(create_params),
        ..Default::default()
    })
}

async fn run_script(script: String, limits: &RenderLimits) -> Result<String, BoundaryError> {
    let mut runtime = create_runtime(limits.max_heap_size);
    runtime
        .execute_script("[glimpse:bootstrap]", BOOTSTRAP.to_string())
        .map_err(|e| BoundaryError::Script(e.to_string()))?;

    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    let watchdog_handle = runtime.v8_isolate().thread_safe_handle();
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog_timed_out = timed_out.clone();
    let timeout = limits.timeout;
    let (cancel_tx, cancel_rx) = std::sync::mpsc::channel::<()>();
    let watchdog = std::thread::spawn(move || {
        if let Err(std::sync::mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
            watchdog_timed_out.store(true, Ordering::SeqCst);
            watchdog_handle.terminate_execution();
        }
    });

    let exec_error = match runtime.execute_script("[glimpse:component]", script) {
        Ok(_) => match tokio::time::timeout(
            timeout,
            runtime.run_event_loop(PollEventLoopOptions::default()),
        )
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("event loop did not settle".to_string()),
        },
        Err(e) => Some(e.to_string()),
    };

    // The watchdog holds an isolate handle; it must be gone before the runtime.
    let _ = cancel_tx.send(());
    let _ = watchdog.join();

    if heap_state.triggered.load(Ordering::SeqCst) {
        return Err(BoundaryError::HeapLimitExceeded);
    }
    if timed_out.load(Ordering::SeqCst) {
        return Err(BoundaryError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        });
    }
    if let Some(message) = exec_error {
        return Err(BoundaryError::Script(message));
    }

    let outcome = {
        let state = runtime.op_state();
        let state = state.borrow();
        state
            .try_borrow::<RenderResult>()
            .map(|r| r.0.clone())
            .ok_or(BoundaryError::NoResult)?
    };

    let outcome: Value = serde_json::from_str(&outcome)?;
    if let Some(error) = outcome.get("error") {
        return Err(BoundaryError::Component(
            error.as_str().unwrap_or("unknown error").to_string(),
        ));
    }
    let html = outcome
        .get("ok")
        .and_then(Value::as_str)
        .ok_or(BoundaryError::NoResult)?
        .to_string();
    if html.len() > limits.max_output_size {
        return Err(BoundaryError::OutputTooLarge {
            max: limits.max_output_size,
        });
    }
    Ok(html)
}

/// Installs the React shim and `__glimpseRender`, then removes `Deno` and
/// the code-generation primitives.
const BOOTSTRAP: &str = r#"((ops) => {
    const setResult = (json) => ops.op_glimpse_set_result(json);

    const Fragment = Symbol.for('glimpse.fragment');
    const ELEMENT = Symbol.for('glimpse.element');
    const VOID = new Set(['area', 'base', 'br', 'col', 'embed', 'hr', 'img', 'input',
        'link', 'meta', 'source', 'track', 'wbr']);
    const UNITLESS = new Set(['opacity', 'zIndex', 'fontWeight', 'lineHeight', 'flex',
        'flexGrow', 'flexShrink', 'order', 'zoom', 'gridRow', 'gridColumn']);
    const ATTR_NAMES = { className: 'class', htmlFor: 'for' };
    const ESCAPES = { '&': '&amp;', '<': '&lt;', '>': '&gt;', '"': '&quot;', "'": '&#39;' };

    const escape = (value) => String(value).replace(/[&<>"']/g, (c) => ESCAPES[c]);

    function createElement(type, props, ...children) {
        const merged = Object.assign({}, props);
        if (children.length === 1) {
            merged.children = children[0];
        } else if (children.length > 1) {
            merged.children = children;
        }
        return Object.freeze({ $$typeof: ELEMENT, type, props: merged });
    }

    class Component {
        constructor(props) {
            this.props = props;
            this.state = {};
        }
        setState() {}
    }
    Component.prototype.isReactComponent = true;

    const createContext = (value) => {
        const context = { value };
        context.Provider = ({ children }) => children;
        context.Consumer = ({ children }) => children(context.value);
        return context;
    };

    const hooks = {
        useState: (init) => [typeof init === 'function' ? init() : init, () => {}],
        useReducer: (_reducer, init, initFn) => [initFn ? initFn(init) : init, () => {}],
        useMemo: (fn) => fn(),
        useCallback: (fn) => fn,
        useRef: (current) => ({ current }),
        useEffect: () => {},
        useLayoutEffect: () => {},
        useContext: (context) => (context ? context.value : undefined),
        useId: (() => { let n = 0; return () => `g-${++n}`; })(),
    };

    const cssName = (key) => key.replace(/[A-Z]/g, (m) => '-' + m.toLowerCase());
    const styleText = (style) => Object.keys(style)
        .filter((k) => style[k] != null && style[k] !== false && style[k] !== '')
        .map((k) => {
            const v = style[k];
            const unit = typeof v === 'number' && v !== 0 && !UNITLESS.has(k) ? 'px' : '';
            return `${cssName(k)}:${v}${unit}`;
        })
        .join(';');

    function attributes(props) {
        let out = '';
        for (const key of Object.keys(props)) {
            if (key === 'children' || key === 'key' || key === 'ref') continue;
            const value = props[key];
            if (value == null || value === false || typeof value === 'function') continue;
            if (key === 'style' && typeof value === 'object') {
                out += ` style="${escape(styleText(value))}"`;
                continue;
            }
            const name = ATTR_NAMES[key] || key;
            out += value === true ? ` ${name}` : ` ${name}="${escape(value)}"`;
        }
        return out;
    }

    function renderNode(node) {
        if (node == null || typeof node === 'boolean') return '';
        if (Array.isArray(node)) return node.map(renderNode).join('');
        if (typeof node !== 'object') return escape(node);
        if (node.$$typeof !== ELEMENT) {
            throw new Error('Objects are not valid as a child; render a string or element instead');
        }
        const { type, props } = node;
        if (type === Fragment) return renderNode(props.children);
        if (typeof type === 'function') {
            if (type.prototype && type.prototype.isReactComponent) {
                return renderNode(new type(props).render());
            }
            return renderNode(type(props));
        }
        if (typeof type !== 'string') {
            throw new Error(`invalid element type: ${String(type)}`);
        }
        const open = `<${type}${attributes(props)}`;
        if (VOID.has(type)) return `${open}/>`;
        return `${open}>${renderNode(props.children)}</${type}>`;
    }

    const React = Object.freeze(Object.assign({
        createElement, Fragment, Component, createContext,
    }, hooks));

    const renderComponent = (load, dataJson) => {
        let outcome;
        try {
            const component = load();
            const data = JSON.parse(dataJson);
            outcome = { ok: renderNode(createElement(component, { data })) };
        } catch (e) {
            outcome = { error: e && e.message ? String(e.message) : String(e) };
        }
        setResult(JSON.stringify(outcome));
    };

    const define = (name, value) => Object.defineProperty(globalThis, name, {
        value, writable: false, configurable: false, enumerable: false,
    });
    define('React', React);
    for (const name of Object.keys(hooks)) define(name, hooks[name]);
    define('__glimpseRender', renderComponent);

    delete globalThis.Deno;
    delete globalThis.eval;
    const AsyncFunction = (async function () {}).constructor;
    const GeneratorFunction = (function* () {}).constructor;
    for (const ctor of [Function, AsyncFunction, GeneratorFunction]) {
        Object.defineProperty(ctor.prototype, 'constructor', {
            value: undefined, configurable: false, writable: false,
        });
    }
})(Deno.core.ops);"#;
