//! Prefix commands: descriptors, the alias index and the dispatch pipeline.

use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use tracing::Instrument;

use crate::{
    bot::Bot,
    commands::CommandError,
    transport::InboundMessage,
};

pub type Handler =
    Arc<dyn Fn(Arc<Bot>, Invocation) -> BoxFuture<'static, Result<(), CommandError>> + Send + Sync>;

/// Wraps an async fn into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Arc<Bot>, Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CommandError>> + Send + 'static,
{
    Arc::new(move |bot: Arc<Bot>, invocation: Invocation| f(bot, invocation).boxed())
}

/// What a handler is called with.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub message: InboundMessage,
    /// `None` for commands that take no arguments.
    pub args: Option<Vec<String>>,
}

impl Invocation {
    pub fn args(&self) -> &[String] {
        self.args.as_deref().unwrap_or_default()
    }

    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args().get(i).map(String::as_str)
    }
}

#[derive(Clone)]
pub struct CommandDescriptor {
    pub capability: String,
    pub aliases: Vec<String>,
    pub default_permission: bool,
    pub no_arguments: bool,
    pub min_arguments: usize,
    /// `None` is unbounded.
    pub max_arguments: Option<usize>,
    pub handler: Handler,
}

impl CommandDescriptor {
    /// An allow-by-default command taking any number of arguments.
    pub fn new<'a>(
        capability: &str,
        aliases: impl IntoIterator<Item = &'a str>,
        handler: Handler,
    ) -> Self {
        Self {
            capability: capability.to_string(),
            aliases: aliases.into_iter().map(str::to_string).collect(),
            default_permission: true,
            no_arguments: false,
            min_arguments: 0,
            max_arguments: None,
            handler,
        }
    }

    pub fn deny_by_default(mut self) -> Self {
        self.default_permission = false;
        self
    }

    /// The handler receives `None` instead of the words after the alias.
    /// Extra words are still subject to the arity limits.
    pub fn no_arguments(mut self) -> Self {
        self.no_arguments = true;
        self
    }

    pub fn arguments(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_arguments = min;
        self.max_arguments = max;
        self
    }
}

impl fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("capability", &self.capability)
            .field("aliases", &self.aliases)
            .field("default_permission", &self.default_permission)
            .field("no_arguments", &self.no_arguments)
            .field("min_arguments", &self.min_arguments)
            .field("max_arguments", &self.max_arguments)
            .finish_non_exhaustive()
    }
}

/// How a message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Ignored,
    NotFound,
    NotEnoughArguments,
    TooManyArguments,
    PermissionDenied,
    Handled,
    Failed(String),
}

impl Dispatch {
    fn label(&self) -> &'static str {
        match self {
            Dispatch::Ignored => "ignored",
            Dispatch::NotFound => "not_found",
            Dispatch::NotEnoughArguments => "not_enough_arguments",
            Dispatch::TooManyArguments => "too_many_arguments",
            Dispatch::PermissionDenied => "permission_denied",
            Dispatch::Handled => "handled",
            Dispatch::Failed(_) => "failed",
        }
    }
}

#[derive(Default, Clone)]
pub struct Router {
    by_alias: HashMap<String, Arc<CommandDescriptor>>,
    by_capability: HashMap<String, Arc<CommandDescriptor>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every descriptor by its aliases and capability. A later
    /// registration of the same alias replaces the earlier one.
    pub fn register<I>(&mut self, descriptors: I)
    where
        I: IntoIterator<Item = CommandDescriptor>,
    {
        for desc in descriptors {
            let desc = Arc::new(desc);
            for alias in &desc.aliases {
                self.by_alias.insert(alias.to_lowercase(), desc.clone());
            }
            self.by_capability
                .insert(desc.capability.to_lowercase(), desc);
        }
    }

    pub fn find(&self, alias: &str) -> Option<&Arc<CommandDescriptor>> {
        self.by_alias.get(&alias.to_lowercase())
    }

    /// Capability name and default permission of every registered command.
    pub fn capability_defaults(&self) -> Vec<(String, bool)> {
        self.by_capability
            .values()
            .map(|desc| (desc.capability.clone(), desc.default_permission))
            .collect()
    }

    pub async fn dispatch(&self, bot: &Arc<Bot>, message: InboundMessage) -> Dispatch {
        let config = bot.config();
        if !message.is_private && message.channel_id != config.text_channel {
            return Dispatch::Ignored;
        }
        let Some(body) = message.content.trim_start().strip_prefix(config.prefix.as_str()) else {
            return Dispatch::Ignored;
        };

        let mut tokens = body.split_whitespace();
        let alias = tokens.next().unwrap_or_default().to_string();
        let args: Vec<String> = tokens.map(str::to_string).collect();

        if !message.is_private {
            bot.schedule_delete(&message);
        }

        let span = tracing::info_span!("dispatch", alias = %alias, user = %message.author.id);
        let res = self
            .run(bot, message, &alias, args)
            .instrument(span)
            .await;
        metrics::counter!("tanuki_dispatch_total", "result" => res.label()).increment(1);
        res
    }

    async fn run(
        &self,
        bot: &Arc<Bot>,
        message: InboundMessage,
        alias: &str,
        args: Vec<String>,
    ) -> Dispatch {
        let Some(desc) = self.find(alias).cloned() else {
            bot.reply(&message, "Command not found").await;
            return Dispatch::NotFound;
        };

        if args.len() < desc.min_arguments {
            bot.reply(&message, "Not enough arguments provided").await;
            return Dispatch::NotEnoughArguments;
        }
        if desc.max_arguments.is_some_and(|max| args.len() > max) {
            bot.reply(&message, "Too many arguments provided").await;
            return Dispatch::TooManyArguments;
        }

        let user = &message.author.id;
        if !bot.config().is_owner(user)
            && !bot
                .permissions()
                .get(user, &desc.capability, desc.default_permission)
        {
            tracing::info!(capability = %desc.capability, "permission denied");
            bot.reply(&message, "Permission denied!").await;
            return Dispatch::PermissionDenied;
        }

        let channel = message.channel_id.clone();
        let invocation = Invocation {
            message,
            args: (!desc.no_arguments).then_some(args),
        };

        match (desc.handler)(bot.clone(), invocation).await {
            Ok(()) => Dispatch::Handled,
            Err(err) => {
                tracing::warn!(capability = %desc.capability, "command failed: {err}");
                bot.say(&channel, &format!("Error: {err}")).await;
                Dispatch::Failed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Handler {
        handler(|_, _| async { Ok(()) })
    }

    #[test]
    fn aliases_are_case_insensitive() {
        let mut router = Router::new();
        router.register([CommandDescriptor::new("queue", ["queue", "Q"], noop())]);

        assert_eq!(router.find("QUEUE").unwrap().capability, "queue");
        assert_eq!(router.find("q").unwrap().capability, "queue");
        assert!(router.find("qq").is_none());
    }

    #[test]
    fn later_alias_wins() {
        let mut router = Router::new();
        router.register([
            CommandDescriptor::new("first", ["x"], noop()),
            CommandDescriptor::new("second", ["x"], noop()),
        ]);
        assert_eq!(router.find("x").unwrap().capability, "second");
    }

    #[test]
    fn no_arguments_keeps_arity_unbounded() {
        let desc = CommandDescriptor::new("skip", ["skip"], noop()).no_arguments();
        assert!(desc.no_arguments);
        assert_eq!(desc.min_arguments, 0);
        assert_eq!(desc.max_arguments, None);
    }

    #[test]
    fn capability_defaults_follow_descriptors() {
        let mut router = Router::new();
        router.register([
            CommandDescriptor::new("skip", ["skip"], noop()).no_arguments(),
            CommandDescriptor::new("setPermissions", ["setperm"], noop())
                .deny_by_default()
                .arguments(3, Some(3)),
        ]);

        let mut defaults = router.capability_defaults();
        defaults.sort();
        assert_eq!(
            defaults,
            [
                ("setPermissions".to_string(), false),
                ("skip".to_string(), true)
            ]
        );
    }

    #[test]
    fn invocation_args_default_to_empty() {
        let message = InboundMessage {
            id: "m".to_string(),
            channel_id: "c".to_string(),
            author: crate::transport::Author {
                id: "u".to_string(),
                name: "u".to_string(),
            },
            content: "!skip".to_string(),
            mentions: vec![],
            is_private: false,
        };
        let invocation = Invocation {
            message,
            args: None,
        };
        assert!(invocation.args().is_empty());
        assert_eq!(invocation.arg(0), None);
    }
}
