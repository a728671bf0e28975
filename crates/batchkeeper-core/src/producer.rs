// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job producers and target resolution.
//!
//! A producer yields job payloads lazily and in order. The controller numbers
//! them, so a producer only has to know where to pick up, which it learns from
//! the resume hint: the payload of the last checkpointed job.
//!
//! Producers are addressed either directly or through a `component:name`
//! locator looked up in a [`ProducerRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{BoxStream, Stream};

use crate::error::{Error, Result};
use crate::types::Payload;

/// Source of job payloads for one run.
pub trait Producer<T: Payload>: Send + Sync {
    /// Start producing payloads.
    ///
    /// `resume` is the payload of the last checkpointed job, or `None` on a
    /// fresh run. The stream is consumed once, in order.
    fn produce(&self, resume: Option<T>) -> BoxStream<'static, T>;
}

/// Producer backed by a closure returning an iterator.
pub struct FnProducer<F> {
    f: F,
}

impl<T, F, I> Producer<T> for FnProducer<F>
where
    T: Payload,
    F: Fn(Option<T>) -> I + Send + Sync,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    fn produce(&self, resume: Option<T>) -> BoxStream<'static, T> {
        futures::stream::iter((self.f)(resume)).boxed()
    }
}

/// Producer backed by a closure returning a stream.
pub struct StreamProducer<F> {
    f: F,
}

impl<T, F, S> Producer<T> for StreamProducer<F>
where
    T: Payload,
    F: Fn(Option<T>) -> S + Send + Sync,
    S: Stream<Item = T> + Send + 'static,
{
    fn produce(&self, resume: Option<T>) -> BoxStream<'static, T> {
        (self.f)(resume).boxed()
    }
}

/// Wrap a closure returning an iterator as a producer.
///
/// ```
/// use batchkeeper_core::producer::{Producer, from_fn};
///
/// let numbers = from_fn(|resume: Option<u64>| {
///     let start = resume.map_or(0, |last| last + 1);
///     start..10
/// });
/// let _stream = numbers.produce(Some(4));
/// ```
pub fn from_fn<F>(f: F) -> FnProducer<F> {
    FnProducer { f }
}

/// Wrap a closure returning a stream as a producer.
pub fn from_stream_fn<F>(f: F) -> StreamProducer<F> {
    StreamProducer { f }
}

/// Parsed `component:name` producer locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProducerLocator {
    /// Dotted component path, also used to name the default checkpoint file.
    pub component: String,
    /// Producer name within the component.
    pub name: String,
}

impl ProducerLocator {
    /// Parse `path.to.component:producer_name`.
    ///
    /// Exactly one `:` with non-empty text on both sides is accepted.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        match parts.as_slice() {
            [component, name] if !component.trim().is_empty() && !name.trim().is_empty() => {
                Ok(Self {
                    component: component.trim().to_string(),
                    name: name.trim().to_string(),
                })
            }
            _ => Err(Error::InvalidTargetSpec(spec.to_string())),
        }
    }
}

impl fmt::Display for ProducerLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.component, self.name)
    }
}

/// How the controller is told which producer to run.
pub enum ProducerTarget<T: Payload> {
    /// A producer value, with the component name its checkpoint file is
    /// named after.
    Direct {
        component: String,
        producer: Arc<dyn Producer<T>>,
    },
    /// A `component:name` locator resolved through a [`ProducerRegistry`].
    Locator(String),
}

impl<T: Payload> ProducerTarget<T> {
    /// Target a producer value directly.
    pub fn direct(component: impl Into<String>, producer: impl Producer<T> + 'static) -> Self {
        ProducerTarget::Direct {
            component: component.into(),
            producer: Arc::new(producer),
        }
    }
}

impl<T: Payload> fmt::Debug for ProducerTarget<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProducerTarget::Direct { component, .. } => f
                .debug_struct("Direct")
                .field("component", component)
                .finish_non_exhaustive(),
            ProducerTarget::Locator(spec) => f.debug_tuple("Locator").field(spec).finish(),
        }
    }
}

impl<T: Payload> From<&str> for ProducerTarget<T> {
    fn from(spec: &str) -> Self {
        ProducerTarget::Locator(spec.to_string())
    }
}

impl<T: Payload> From<String> for ProducerTarget<T> {
    fn from(spec: String) -> Self {
        ProducerTarget::Locator(spec)
    }
}

/// A producer ready to run, with the names it was resolved under.
pub struct ResolvedProducer<T: Payload> {
    /// Component the producer belongs to.
    pub component: String,
    /// Producer name, when resolved from a locator.
    pub name: Option<String>,
    /// The producer itself.
    pub producer: Arc<dyn Producer<T>>,
}

impl<T: Payload> ResolvedProducer<T> {
    /// Default checkpoint path: `<dir>/<component>.state`.
    pub fn default_state_file(&self, dir: &Path) -> PathBuf {
        let file_stem = self.component.replace(['/', '\\'], "_");
        dir.join(format!("{file_stem}.state"))
    }

    /// Human-readable target label for logs.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{}:{}", self.component, name),
            None => self.component.clone(),
        }
    }
}

impl<T: Payload> fmt::Debug for ResolvedProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedProducer")
            .field("component", &self.component)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Named producers, looked up by locator.
pub struct ProducerRegistry<T: Payload> {
    producers: HashMap<ProducerLocator, Arc<dyn Producer<T>>>,
}

impl<T: Payload> Default for ProducerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Payload> Clone for ProducerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            producers: self.producers.clone(),
        }
    }
}

impl<T: Payload> ProducerRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            producers: HashMap::new(),
        }
    }

    /// Register `producer` as `component:name`, replacing any previous entry.
    pub fn register(
        &mut self,
        component: impl Into<String>,
        name: impl Into<String>,
        producer: impl Producer<T> + 'static,
    ) -> &mut Self {
        let locator = ProducerLocator {
            component: component.into(),
            name: name.into(),
        };
        self.producers.insert(locator, Arc::new(producer));
        self
    }

    /// Registered locators, sorted.
    pub fn locators(&self) -> Vec<String> {
        let mut names: Vec<String> = self.producers.keys().map(|l| l.to_string()).collect();
        names.sort();
        names
    }

    /// Resolve a target to a runnable producer.
    ///
    /// Locators that don't parse fail with [`Error::InvalidTargetSpec`];
    /// unknown ones with [`Error::TargetNotFound`].
    pub fn resolve(&self, target: ProducerTarget<T>) -> Result<ResolvedProducer<T>> {
        match target {
            ProducerTarget::Direct {
                component,
                producer,
            } => Ok(ResolvedProducer {
                component,
                name: None,
                producer,
            }),
            ProducerTarget::Locator(spec) => {
                let locator = ProducerLocator::parse(&spec)?;
                let producer = self
                    .producers
                    .get(&locator)
                    .cloned()
                    .ok_or_else(|| Error::TargetNotFound(locator.to_string()))?;
                Ok(ResolvedProducer {
                    component: locator.component,
                    name: Some(locator.name),
                    producer,
                })
            }
        }
    }
}
