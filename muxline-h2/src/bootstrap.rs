//! Bootstrap for stream channels.
//!
//! Carries the handler template and the option/attribute maps applied to
//! every stream channel the multiplexer creates — both the channels it
//! synthesizes for remotely-initiated streams and the ones the
//! application connects for locally-initiated streams.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::channel::StreamChannel;
use crate::config::{ChannelConfig, OptionValue};
use crate::handler::StreamHandler;
use crate::stream::FrameStream;

type HandlerFactory = Box<dyn Fn() -> Box<dyn StreamHandler>>;

/// Builder for stream channels.
///
/// The parent channel slot must be empty when the bootstrap is handed to
/// the multiplexer; it is bound when the multiplexer attaches to the
/// parent pipeline.
pub struct StreamChannelBootstrap {
    handler_factory: HandlerFactory,
    options: Vec<(String, OptionValue)>,
    attrs: HashMap<String, Rc<dyn Any>>,
    parent_bound: bool,
}

impl StreamChannelBootstrap {
    /// A bootstrap that installs a handler built by `factory` on each new
    /// stream channel.
    pub fn new(factory: impl Fn() -> Box<dyn StreamHandler> + 'static) -> Self {
        Self {
            handler_factory: Box::new(factory),
            options: Vec::new(),
            attrs: HashMap::new(),
            parent_bound: false,
        }
    }

    /// Set a channel option by name, applied to each new channel.
    ///
    /// Unknown options and invalid values log a warning at channel
    /// creation; they never fail it.
    pub fn option(mut self, name: impl Into<String>, value: OptionValue) -> Self {
        self.options.push((name.into(), value));
        self
    }

    /// Attach a typed attribute to each new channel, retrievable through
    /// `StreamCtx::attr`.
    pub fn attr(mut self, name: impl Into<String>, value: Rc<dyn Any>) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub(crate) fn parent_bound(&self) -> bool {
        self.parent_bound
    }

    pub(crate) fn bind_parent(&mut self) {
        self.parent_bound = true;
    }

    /// Build a channel for `stream`: instantiate the handler template and
    /// apply the option and attribute maps.
    pub(crate) fn build_channel(&self, stream: FrameStream) -> StreamChannel {
        let mut config = ChannelConfig::default();
        for (name, value) in &self.options {
            config.set_option(name, *value);
        }
        StreamChannel::new(
            stream,
            (self.handler_factory)(),
            config,
            self.attrs.clone(),
        )
    }
}

impl std::fmt::Debug for StreamChannelBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamChannelBootstrap")
            .field("options", &self.options)
            .field("parent_bound", &self.parent_bound)
            .finish()
    }
}
