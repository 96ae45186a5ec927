use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt, io,
    panic::{self, PanicHookInfo},
    sync::{Arc, Mutex, Once},
};

use crate::{node::CodeLocation, util::lock};

/// Panic details recorded by the hook on the panicking thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CapturedPanic {
    pub message: String,
    pub location: Option<CodeLocation>,
}

thread_local! {
    static IS_NODE_THREAD: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<CapturedPanic>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Install the process wide panic hook once.
///
/// Panics on node threads are recorded silently; every other thread keeps
/// the previously installed hook.
pub(crate) fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if !IS_NODE_THREAD.get() {
                return previous(info);
            }

            let message = payload_as_string(info.payload());
            let location = info.location().map(CodeLocation::from);
            LAST_PANIC.with_borrow_mut(|last| *last = Some(CapturedPanic { message, location }));
        }));
    });
}

/// Marks the current thread as executing node bodies while alive.
pub(crate) struct NodeThreadGuard {
    was_node_thread: bool,
}

impl NodeThreadGuard {
    pub fn enter() -> Self {
        install_panic_hook();
        let was_node_thread = IS_NODE_THREAD.replace(true);
        Self { was_node_thread }
    }
}

impl Drop for NodeThreadGuard {
    fn drop(&mut self) {
        IS_NODE_THREAD.set(self.was_node_thread);
    }
}

/// Take the panic recorded on this thread, if any.
pub(crate) fn take_last_panic() -> Option<CapturedPanic> {
    LAST_PANIC.with_borrow_mut(Option::take)
}

/// Convert a panic payload into a string.
///
/// This matches the common payload types produced by `panic!` (`&'static str` and `String`).
/// Other payload types are formatted as a generic placeholder.
pub(crate) fn payload_as_string(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("Box<dyn Any>"))
}

/// Output written by a spec, captured into its report.
///
/// Cheap to clone; all clones share one buffer.
#[derive(Default, Clone)]
pub struct SpecWriter(Arc<Mutex<Vec<u8>>>);

impl SpecWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }
}

impl fmt::Debug for SpecWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SpecWriter")
            .field(&lock(&self.0).len())
            .finish()
    }
}

impl io::Write for SpecWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, panic::catch_unwind};

    use super::*;

    #[test]
    fn node_thread_panics_are_recorded() {
        let _guard = NodeThreadGuard::enter();
        let result = catch_unwind(|| panic!("kaboom {}", 7));
        assert!(result.is_err());

        let captured = take_last_panic().expect("panic recorded");
        assert_eq!(captured.message, "kaboom 7");
        let location = captured.location.expect("panic location");
        assert!(location.file.ends_with("capture.rs"));
        assert!(take_last_panic().is_none());
    }

    #[test]
    fn payloads_are_stringified() {
        assert_eq!(payload_as_string(&"static"), "static");
        assert_eq!(payload_as_string(&String::from("owned")), "owned");
        assert_eq!(payload_as_string(&42u8), "Box<dyn Any>");
    }

    #[test]
    fn writer_clones_share_a_buffer() {
        let writer = SpecWriter::new();
        let mut clone = writer.clone();
        write!(clone, "a").unwrap();
        writeln!(clone, "b").unwrap();
        assert_eq!(writer.contents(), "ab\n");
        assert_eq!(clone.contents(), writer.contents());
    }
}
