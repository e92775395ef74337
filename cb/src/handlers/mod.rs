//! Built-in handlers served by every bridge host

mod echo;
mod ping;
mod sleep;

use std::sync::Arc;

pub use echo::EchoHandler;
pub use ping::PingHandler;
pub use sleep::SleepHandler;

use crate::error::DispatchError;
use crate::registry::HandlerRegistry;

/// Register `ping`, `echo` and `sleep` on `registry`
pub fn install(registry: &mut HandlerRegistry) -> Result<(), DispatchError> {
    registry.register_arc("ping", Arc::new(PingHandler))?;
    registry.register_arc("echo", Arc::new(EchoHandler))?;
    registry.register_arc("sleep", Arc::new(SleepHandler))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::envelope::Mode;
    use crate::sink::MemorySink;

    #[tokio::test]
    async fn test_install_registers_builtins() {
        let bus = Arc::new(EventBus::new(10));
        let mut registry = HandlerRegistry::new(Mode::Sync, bus, Arc::new(MemorySink::new()));
        install(&mut registry).unwrap();

        assert_eq!(registry.instruction_names(), vec!["echo", "ping", "sleep"]);

        let report = registry.introspect(None).await;
        assert_eq!(report["ping"], Vec::<String>::new());
        assert_eq!(report["echo"], vec!["data.text"]);
        assert_eq!(report["sleep"], vec!["data.ms"]);
    }

    #[test]
    fn test_install_twice_is_rejected() {
        let bus = Arc::new(EventBus::new(10));
        let mut registry = HandlerRegistry::new(Mode::Async, bus, Arc::new(MemorySink::new()));
        install(&mut registry).unwrap();
        assert!(matches!(install(&mut registry), Err(DispatchError::DuplicateHandler { .. })));
    }
}
