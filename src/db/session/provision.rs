use crate::db::connection::{Connector, DataSource, DbHandle, ServerFlavor};
use crate::db::error::{Result, SessionError};
use crate::db::options::{missing_target_fields, SourceOptions};
use crate::utils::GovernanceConfig;

use super::context::RunContext;

/// Normalize and validate the run's options, then open every connection the
/// run needs. Called once per run, before any statement is processed.
pub fn check_options(ctx: &mut RunContext, connector: &dyn Connector) -> Result<()> {
    ctx.options.normalize();
    ctx.mode = ctx.options.mode();
    ctx.options.validate()?;

    let source = target_source(&ctx.options, &ctx.config)?;
    ctx.directive = ctx.options.middleware_directive();

    log::debug!("con:{} connecting to {}", ctx.conn_id, source.dsn());
    let mut db = connect(ctx.conn_id, connector, &source)?;

    if ctx.options.tran_batch > 1 {
        ctx.ddl_db = Some(connect(ctx.conn_id, connector, &source)?);
    }

    if ctx.options.execute && ctx.options.backup && !db.binlog_enabled()? {
        return Err(SessionError::BinlogDisabled);
    }

    if ctx.options.backup {
        let backup = backup_source(&ctx.config)?;
        ctx.backup_db = Some(connect(ctx.conn_id, connector, &backup)?);
    }

    let command = ctx.mode.command_label();
    let (host, port, user) = (
        ctx.options.host.clone(),
        ctx.options.port,
        ctx.options.user.clone(),
    );
    ctx.process.publish(|pi| {
        pi.dest_host = host;
        pi.dest_port = port;
        pi.dest_user = user;
        pi.command = command.to_string();
    });

    match db.server_version() {
        Ok(banner) => {
            ctx.flavor = ServerFlavor::from_banner(&banner);
            ctx.server_version = banner;
        }
        Err(err) => log::warn!("con:{} unable to read server version: {}", ctx.conn_id, err),
    }
    ctx.db = Some(db);

    if ctx.options.backup && !ctx.flavor.supports_backup() {
        let message = format!("backup is not supported on {:?} servers", ctx.flavor);
        log::warn!("con:{} {}", ctx.conn_id, message);
        ctx.diagnostics.push(message);
    }

    Ok(())
}

/// Primary target, or the middleware-routed database when a tag is configured.
pub fn target_source(options: &SourceOptions, config: &GovernanceConfig) -> Result<DataSource> {
    let base = |database: &str| {
        DataSource::new(
            &options.user,
            &options.password,
            &options.host,
            options.port,
            database,
        )
        .with_param("charset", &config.default_charset)
        .with_param("maxAllowedPacket", config.max_allowed_packet)
    };

    let source = if options.uses_middleware() {
        base(&options.middleware_db)
            .with_param("maxOpen", 100)
            .with_param("maxLifetime", 60)
    } else {
        let tls = options.tls_mode()?;
        base(&options.db)
            .with_param("tls", tls.as_str())
            .with_tls(tls)
    };
    Ok(source.with_param("autocommit", 1))
}

/// Backup destination, validated like the primary target.
pub fn backup_source(config: &GovernanceConfig) -> Result<DataSource> {
    let missing = missing_target_fields(&config.backup_host, config.backup_port, &config.backup_user);
    if !missing.is_empty() {
        return Err(SessionError::InvalidBackupSource(missing.join(",")));
    }
    Ok(DataSource::new(
        &config.backup_user,
        &config.backup_password,
        &config.backup_host,
        config.backup_port,
        "",
    )
    .with_param("charset", &config.default_charset)
    .with_param("autocommit", 1))
}

fn connect(conn_id: u64, connector: &dyn Connector, source: &DataSource) -> Result<Box<dyn DbHandle>> {
    connector.connect(source).map_err(|source_err| {
        log::error!("con:{} connection to {} failed: {}", conn_id, source.display_string(), source_err);
        SessionError::Connect {
            conn_id,
            source: source_err,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_source_params() {
        let mut options = SourceOptions::new("db1", 1521, "scott", "tiger");
        options.db = "ORCL".to_string();
        options.ssl = "required".to_string();
        let source = target_source(&options, &GovernanceConfig::new()).unwrap();
        assert_eq!(
            source.dsn(),
            "scott@tcps(db1:1521)/ORCL?charset=AL32UTF8&maxAllowedPacket=8192&tls=true&autocommit=1"
        );
    }

    #[test]
    fn test_middleware_source_uses_middleware_db() {
        let mut options = SourceOptions::new("proxy", 3307, "app", "");
        options.db = "ignored".to_string();
        options.middleware_extend = "shard: 3".to_string();
        options.middleware_db = "routed".to_string();
        options.ssl = "bogus".to_string();
        let source = target_source(&options, &GovernanceConfig::new()).unwrap();
        assert_eq!(source.database, "routed");
        assert_eq!(source.param("maxOpen"), Some("100"));
        assert_eq!(source.param("maxLifetime"), Some("60"));
        assert_eq!(source.param("tls"), None);
    }

    #[test]
    fn test_invalid_tls_is_config_error() {
        let mut options = SourceOptions::new("db1", 1521, "scott", "");
        options.ssl = "sometimes".to_string();
        let err = target_source(&options, &GovernanceConfig::new()).unwrap_err();
        assert!(matches!(err, SessionError::InvalidTls(_)));
    }

    #[test]
    fn test_backup_source_requires_fields() {
        let mut config = GovernanceConfig::new();
        config.backup_host = "bk1".to_string();
        let err = backup_source(&config).unwrap_err().to_string();
        assert!(err.contains("port is 0"), "{err}");
        assert!(err.contains("user is empty"), "{err}");

        config.backup_port = 1521;
        config.backup_user = "backup".to_string();
        let source = backup_source(&config).unwrap();
        assert_eq!(source.database, "");
    }
}
