//! Module registry.
//!
//! Modules are registered under a name together with a factory. Building one
//! runs three explicit phases: construct, `wire` (pull dependencies out of the
//! registry), then `init`.
//!
//! Three ways to obtain a module:
//!
//! - [`Registry::create`] always builds a fresh instance.
//! - [`Registry::get`] reuses the instance handed out last time while someone
//!   still holds it, and builds a new one otherwise.
//! - [`Registry::instance`] keeps the first instance alive for the lifetime of
//!   the registry.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use crate::error::{RenderError, RenderResult};

/// Shared, mutable module handle
pub type Handle<T> = Rc<RefCell<T>>;

/// A unit the registry can construct and wire
pub trait Module: Any {
    /// Resolve dependencies from the registry
    fn wire(&mut self, _registry: &Registry) -> RenderResult<()> {
        Ok(())
    }

    /// Runs after `wire`, once every dependency is in place
    fn init(&mut self) -> RenderResult<()> {
        Ok(())
    }
}

type Factory = Box<dyn Fn(&Registry) -> RenderResult<Rc<dyn Any>>>;

#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
    live: RefCell<HashMap<String, Weak<dyn Any>>>,
    cache: RefCell<HashMap<String, Rc<dyn Any>>>,
    constructing: RefCell<HashSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous registration
    pub fn register<T, F>(&mut self, name: &str, factory: F)
    where
        T: Module,
        F: Fn() -> T + 'static,
    {
        let factory: Factory = Box::new(move |registry| {
            let mut module = factory();
            module.wire(registry)?;
            module.init()?;
            Ok(Rc::new(RefCell::new(module)) as Rc<dyn Any>)
        });

        if self.factories.insert(name.to_string(), factory).is_some() {
            log::debug!("Replaced registration for module '{}'", name);
        }
    }

    /// Build a new instance of `name`
    pub fn create<T: Module>(&self, name: &str) -> RenderResult<Handle<T>> {
        let module = self.construct(name)?;
        downcast(name, module)
    }

    /// The live instance of `name`, built if nothing holds one
    pub fn get<T: Module>(&self, name: &str) -> RenderResult<Handle<T>> {
        let live = self.live.borrow().get(name).and_then(Weak::upgrade);
        if let Some(module) = live {
            return downcast(name, module);
        }

        let module = self.construct(name)?;
        self.live
            .borrow_mut()
            .insert(name.to_string(), Rc::downgrade(&module));
        downcast(name, module)
    }

    /// The registry-owned instance of `name`
    pub fn instance<T: Module>(&self, name: &str) -> RenderResult<Handle<T>> {
        let cached = self.cache.borrow().get(name).cloned();
        if let Some(module) = cached {
            return downcast(name, module);
        }

        let module = self.get::<T>(name)?;
        self.cache
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&module) as Rc<dyn Any>);
        Ok(module)
    }

    fn construct(&self, name: &str) -> RenderResult<Rc<dyn Any>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RenderError::Registry(format!("No module registered as '{}'", name)))?;

        if !self.constructing.borrow_mut().insert(name.to_string()) {
            return Err(RenderError::Registry(format!(
                "Dependency cycle while building '{}'",
                name
            )));
        }

        log::debug!("Building module '{}'", name);
        let result = factory(self);
        self.constructing.borrow_mut().remove(name);
        result
    }
}

fn downcast<T: Module>(name: &str, module: Rc<dyn Any>) -> RenderResult<Handle<T>> {
    module.downcast::<RefCell<T>>().map_err(|_| {
        RenderError::Registry(format!(
            "Module '{}' is not a {}",
            name,
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Default)]
    struct Settings {
        value: u32,
    }

    impl Module for Settings {}

    #[derive(Debug)]
    struct Consumer {
        settings: Option<Handle<Settings>>,
        seen_at_init: Option<u32>,
    }

    impl Module for Consumer {
        fn wire(&mut self, registry: &Registry) -> RenderResult<()> {
            self.settings = Some(registry.instance("settings")?);
            Ok(())
        }

        fn init(&mut self) -> RenderResult<()> {
            self.seen_at_init = self.settings.as_ref().map(|s| s.borrow().value);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Loop;

    impl Module for Loop {
        fn wire(&mut self, registry: &Registry) -> RenderResult<()> {
            registry.get::<Loop>("loop").map(|_| ())
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register("settings", || Settings { value: 7 });
        registry.register("consumer", || Consumer {
            settings: None,
            seen_at_init: None,
        });
        registry
    }

    #[test]
    fn create_builds_fresh_instances() {
        let registry = registry();
        let a = registry.create::<Settings>("settings").unwrap();
        let b = registry.create::<Settings>("settings").unwrap();
        a.borrow_mut().value = 1;
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(b.borrow().value, 7);
    }

    #[test]
    fn get_shares_only_while_held() {
        let registry = registry();
        let a = registry.get::<Settings>("settings").unwrap();
        a.borrow_mut().value = 42;

        let b = registry.get::<Settings>("settings").unwrap();
        assert!(Rc::ptr_eq(&a, &b));

        drop(a);
        drop(b);
        let c = registry.get::<Settings>("settings").unwrap();
        assert_eq!(c.borrow().value, 7);
    }

    #[test]
    fn instance_outlives_its_users() {
        let registry = registry();
        registry
            .instance::<Settings>("settings")
            .unwrap()
            .borrow_mut()
            .value = 3;

        let again = registry.instance::<Settings>("settings").unwrap();
        assert_eq!(again.borrow().value, 3);
    }

    #[test]
    fn wire_runs_before_init() {
        let registry = registry();
        let consumer = registry.create::<Consumer>("consumer").unwrap();
        assert_eq!(consumer.borrow().seen_at_init, Some(7));

        // Wiring went through the registry-owned instance
        let shared = registry.instance::<Settings>("settings").unwrap();
        let wired = consumer.borrow().settings.clone().unwrap();
        assert!(Rc::ptr_eq(&shared, &wired));
    }

    #[test]
    fn factories_run_once_per_build() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);

        let mut registry = Registry::new();
        registry.register("settings", move || {
            counter.set(counter.get() + 1);
            Settings::default()
        });

        let _held = registry.instance::<Settings>("settings").unwrap();
        registry.instance::<Settings>("settings").unwrap();
        registry.get::<Settings>("settings").unwrap();
        assert_eq!(calls.get(), 1);

        registry.create::<Settings>("settings").unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = registry().get::<Settings>("renderer").unwrap_err();
        assert!(matches!(err, RenderError::Registry(_)));
        assert!(err.to_string().contains("renderer"));
    }

    #[test]
    fn wrong_type_is_an_error() {
        let err = registry().create::<Consumer>("settings").unwrap_err();
        assert!(matches!(err, RenderError::Registry(_)));
    }

    #[test]
    fn cycles_are_detected() {
        let mut registry = Registry::new();
        registry.register("loop", || Loop);

        let err = registry.create::<Loop>("loop").unwrap_err();
        assert!(err.to_string().contains("cycle"));

        // The failed build leaves nothing marked as in progress
        assert!(registry.constructing.borrow().is_empty());
    }
}
