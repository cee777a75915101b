//! Bean descriptors, instances and the creation capability supplied by the host.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A materialized bean. Shared by every caller that resolves the same entry.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Identifies a requestable bean within the window scope.
///
/// The descriptor is the storage key: two descriptors are the same bean when
/// both name and group match. A bean without an explicit conversation group
/// forms a group of its own.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct BeanDescriptor {
    name: Arc<str>,
    group: Option<Arc<str>>,
}

impl BeanDescriptor {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            group: None,
        }
    }

    /// Places the bean into the given conversation group.
    pub fn in_group(mut self, group: impl Into<Arc<str>>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The conversation group this bean is closed with.
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.name)
    }
}

impl fmt::Display for BeanDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}@{}", self.name, group),
            None => f.write_str(&self.name),
        }
    }
}

/// Host-supplied capability that materializes a bean and later tears it down.
///
/// The context handed to `create` is the one used to destroy the instance, so
/// dependent objects created alongside the bean can be released with it.
pub trait CreationalContext: Send + Sync {
    fn create(&self, descriptor: &BeanDescriptor) -> anyhow::Result<Instance>;

    fn destroy(&self, descriptor: &BeanDescriptor, instance: Instance);
}

/// [`CreationalContext`] backed by a pair of closures.
pub struct FnCreationalContext<C, D> {
    create: C,
    destroy: D,
}

impl<C> FnCreationalContext<C, fn(&BeanDescriptor, Instance)>
where
    C: Fn(&BeanDescriptor) -> anyhow::Result<Instance> + Send + Sync,
{
    /// A context whose instances need no teardown beyond dropping them.
    pub fn new(create: C) -> Self {
        Self {
            create,
            destroy: |_, _| {},
        }
    }
}

impl<C, D> FnCreationalContext<C, D>
where
    C: Fn(&BeanDescriptor) -> anyhow::Result<Instance> + Send + Sync,
    D: Fn(&BeanDescriptor, Instance) + Send + Sync,
{
    pub fn with_destroy(create: C, destroy: D) -> Self {
        Self { create, destroy }
    }
}

impl<C, D> CreationalContext for FnCreationalContext<C, D>
where
    C: Fn(&BeanDescriptor) -> anyhow::Result<Instance> + Send + Sync,
    D: Fn(&BeanDescriptor, Instance) + Send + Sync,
{
    fn create(&self, descriptor: &BeanDescriptor) -> anyhow::Result<Instance> {
        (self.create)(descriptor)
    }

    fn destroy(&self, descriptor: &BeanDescriptor, instance: Instance) {
        (self.destroy)(descriptor, instance)
    }
}

/// Downcasts a shared instance to its concrete bean type.
pub(crate) fn downcast_instance<T>(
    descriptor: &BeanDescriptor,
    instance: Instance,
) -> crate::Result<Arc<T>>
where
    T: Any + Send + Sync,
{
    instance
        .downcast::<T>()
        .map_err(|_| crate::ScopeError::TypeMismatch {
            descriptor: descriptor.clone(),
            expected: std::any::type_name::<T>(),
        })
}
