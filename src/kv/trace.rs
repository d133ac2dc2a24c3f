//! Tracing and metrics hooks for store commands.
//!
//! One span per command, named after the command, and one `pipeline` span
//! per batch whose operation is the de-duplicated command names joined
//! with `_`. A key-absent reply closes the span as OK.

use tracing::field::{display, Empty};

use crate::kv::command::{Command, CommandStatus};
use crate::kv::hooks::{Context, Hooks};
use crate::kv::store::RedisOptions;

/// Hooks that open a client span per command or batch and record metrics.
pub fn trace_hooks(options: &RedisOptions) -> Hooks {
    let peer = options.peer();
    let db = options.db;
    let batch_peer = peer.clone();

    Hooks::new()
        .before(move |ctx: Context, command: &Command| {
            let span = tracing::info_span!(
                parent: ctx.span(),
                "redis",
                otel.name = %command.name(),
                otel.kind = "client",
                otel.status_code = Empty,
                db.system = "redis",
                db.operation = %command.name(),
                db.statement = %command.statement(),
                db.redis.database_index = db,
                net.peer.name = %peer,
                error.message = Empty,
            );
            Ok(ctx.with_span(span))
        })
        .after(|ctx: &Context, command: &Command| {
            let status = command.status();
            finish(ctx, command.error().filter(|_| status == CommandStatus::Failed));
            record_metrics(command.name(), status, ctx);
            Ok(())
        })
        .before_batch(move |ctx: Context, commands: &[Command]| {
            let span = tracing::info_span!(
                parent: ctx.span(),
                "redis",
                otel.name = "pipeline",
                otel.kind = "client",
                otel.status_code = Empty,
                db.system = "redis",
                db.operation = %batch_name(commands),
                db.redis.database_index = db,
                db.redis.batch_size = commands.len(),
                net.peer.name = %batch_peer,
                error.message = Empty,
            );
            Ok(ctx.with_span(span))
        })
        .after_batch(|ctx: &Context, commands: &[Command]| {
            for command in commands {
                record_metrics(command.name(), command.status(), ctx);
            }
            // The span takes the first genuine failure; the rest stay on their commands.
            let failure = commands
                .iter()
                .find(|command| command.status() == CommandStatus::Failed)
                .and_then(Command::error);
            finish(ctx, failure);
            Ok(())
        })
}

fn finish(ctx: &Context, error: Option<&crate::kv::CommandError>) {
    let span = ctx.span();
    match error {
        Some(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", display(err));
            span.in_scope(|| tracing::debug!(error = %err, "redis command failed"));
        }
        None => {
            span.record("otel.status_code", "OK");
        }
    }
}

fn record_metrics(command: &str, status: CommandStatus, ctx: &Context) {
    metrics::counter!(
        "kv_commands_total",
        "command" => command.to_string(),
        "status" => status.label()
    )
    .increment(1);
    metrics::histogram!("kv_command_duration_seconds", "command" => command.to_string())
        .record(ctx.elapsed().as_secs_f64());
}

/// De-duplicated command names in first-seen order, joined with `_`.
pub fn batch_name(commands: &[Command]) -> String {
    let mut names: Vec<&str> = Vec::new();
    for command in commands {
        if !names.contains(&command.name()) {
            names.push(command.name());
        }
    }
    names.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::CommandError;
    use redis::Value;
    use std::collections::HashMap;
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing_subscriber::layer::SubscriberExt;

    type Fields = HashMap<String, String>;

    /// Latest field values of every span, in creation order.
    #[derive(Clone, Default)]
    struct SpanFields(Arc<Mutex<Vec<(Id, Fields)>>>);

    struct FieldVisitor<'a>(&'a mut Fields);

    impl Visit for FieldVisitor<'_> {
        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{:?}", value));
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for SpanFields {
        fn on_new_span(
            &self,
            attrs: &Attributes<'_>,
            id: &Id,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let mut fields = Fields::new();
            attrs.record(&mut FieldVisitor(&mut fields));
            self.0.lock().unwrap().push((id.clone(), fields));
        }

        fn on_record(&self, id: &Id, values: &Record<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            // Ids are reused once a span closes; the newest holder is the live one.
            let mut spans = self.0.lock().unwrap();
            if let Some((_, fields)) = spans.iter_mut().rev().find(|(span, _)| span == id) {
                values.record(&mut FieldVisitor(fields));
            }
        }
    }

    /// Run `f` with the hooks under a capturing subscriber.
    fn traced(f: impl FnOnce(&Hooks)) -> Vec<Fields> {
        let spans = SpanFields::default();
        let subscriber = tracing_subscriber::registry().with(spans.clone());
        tracing::subscriber::with_default(subscriber, || f(&trace_hooks(&RedisOptions::default())));
        let recorded = spans.0.lock().unwrap();
        recorded.iter().map(|(_, fields)| fields.clone()).collect()
    }

    fn command_span(result: Result<Value, CommandError>) -> Fields {
        let spans = traced(|hooks| {
            let mut command = Command::new("GET").arg("k");
            let ctx = (hooks.before)(Context::new(), &command).unwrap();
            command.set_result(result);
            assert!((hooks.after)(&ctx, &command).is_ok());
        });
        assert_eq!(spans.len(), 1);
        spans.into_iter().next().unwrap()
    }

    fn batch_span(results: Vec<Result<Value, CommandError>>) -> Fields {
        let spans = traced(|hooks| {
            let mut batch: Vec<Command> = results.iter().map(|_| Command::new("GET")).collect();
            let ctx = (hooks.before_batch)(Context::new(), &batch).unwrap();
            for (command, result) in batch.iter_mut().zip(results) {
                command.set_result(result);
            }
            assert!((hooks.after_batch)(&ctx, &batch).is_ok());
        });
        assert_eq!(spans.len(), 1);
        spans.into_iter().next().unwrap()
    }

    #[test]
    fn batch_name_dedups_in_order() {
        let commands = vec![
            Command::new("SET"),
            Command::new("GET"),
            Command::new("SET"),
            Command::new("EXPIRE"),
        ];
        assert_eq!(batch_name(&commands), "set_get_expire");
        assert_eq!(batch_name(&[]), "");
    }

    #[test]
    fn absent_key_closes_span_ok() {
        let nil = command_span(Ok(Value::Nil));
        assert_eq!(nil["otel.name"], "get");
        assert_eq!(nil["db.statement"], "get k");
        assert_eq!(nil["otel.status_code"], "OK");
        assert!(!nil.contains_key("error.message"));

        let no_such_key = command_span(Err(CommandError::Server {
            code: "ERR".to_string(),
            message: "no such key".to_string(),
        }));
        assert_eq!(no_such_key["otel.status_code"], "OK");
        assert!(!no_such_key.contains_key("error.message"));
    }

    #[test]
    fn success_closes_span_ok() {
        let fields = command_span(Ok(Value::Okay));
        assert_eq!(fields["otel.status_code"], "OK");
        assert!(!fields.contains_key("error.message"));
    }

    #[test]
    fn failure_closes_span_with_error() {
        let fields = command_span(Err(CommandError::Timeout));
        assert_eq!(fields["otel.status_code"], "ERROR");
        assert_eq!(fields["error.message"], CommandError::Timeout.to_string());
    }

    #[test]
    fn batch_span_takes_first_genuine_failure() {
        let failed = batch_span(vec![
            Ok(Value::Nil),
            Err(CommandError::Io("reset".into())),
            Err(CommandError::Timeout),
        ]);
        assert_eq!(failed["otel.name"], "pipeline");
        assert_eq!(failed["db.operation"], "get");
        assert_eq!(failed["otel.status_code"], "ERROR");
        assert_eq!(failed["error.message"], CommandError::Io("reset".into()).to_string());

        let clean = batch_span(vec![Ok(Value::Nil), Ok(Value::Okay)]);
        assert_eq!(clean["otel.status_code"], "OK");
        assert!(!clean.contains_key("error.message"));
    }
}
