use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use clap::{CommandFactory, Parser};
use gmsa_auth::{
    prefix_progname_to_error_if_needed, Config, ConfigRecord, Keytab, StrConv, Validator,
};
use once_cell::sync::Lazy;
use std::{process::ExitCode, sync::Arc};
use tracing_subscriber::EnvFilter;

const PROGNAME: &str = "gmsa-klist";
const DEFAULT_KEYTAB: &str = "/etc/krb5.keytab";

static ARGS: Lazy<Args> = Lazy::new(Args::parse);
static NOW: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);
static TIMESTAMP_WIDTH: Lazy<usize> = Lazy::new(|| StrConv::timestamp_to_sfstring(*NOW).len());

#[derive(Parser)]
#[command(name = PROGNAME, version)]
struct Args {
    /// shows the encryption type
    #[arg(short = 'e', default_value_t = false)]
    show_etype: bool,
    /// shows keytab entry timestamps
    #[arg(short = 't', default_value_t = false)]
    show_time: bool,
    /// shows keytab entry keys
    #[arg(short = 'K', default_value_t = false)]
    show_keys: bool,

    /// validates a base64 SPNEGO token against the keytab instead of listing it
    #[arg(long)]
    token: Option<String>,
    /// (with --token) realm the service belongs to
    #[arg(long)]
    realm: Option<String>,
    /// (with --token) service principal name without the realm
    #[arg(long)]
    spn: Option<String>,
    /// (with --token) allowed clock skew in seconds
    #[arg(long)]
    clockskew: Option<u64>,
    /// (with --token) base64 tls-server-end-point hash to check channel binding against
    #[arg(long)]
    cb_tlse: Option<String>,

    /// keytab file (Default is /etc/krb5.keytab)
    name: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    prefix_progname_to_error_if_needed(PROGNAME, run())
}

fn run() -> anyhow::Result<()> {
    let validating = ARGS.token.is_some();
    if !validating && (ARGS.realm.is_some() || ARGS.spn.is_some() || ARGS.cb_tlse.is_some()) {
        return usage();
    }
    if validating && (ARGS.show_time || ARGS.show_keys) {
        return usage();
    }

    // Forces the evaluation of lazy static value `NOW` to use current time
    let _ = *NOW;

    let name = ARGS.name.as_deref().unwrap_or(DEFAULT_KEYTAB);
    let bytes = std::fs::read(name).with_context(|| format!("while reading keytab {}", name))?;
    let keytab =
        Keytab::from_bytes(&bytes).map_err(|e| anyhow::anyhow!("{} while scanning keytab", e))?;

    match &ARGS.token {
        Some(token) => do_validate(keytab, token),
        None => do_keytab(name, &keytab),
    }
}

fn usage() -> anyhow::Result<()> {
    Err(anyhow::anyhow!(Args::command().render_help()))
}

fn do_keytab(name: &str, keytab: &Keytab) -> anyhow::Result<()> {
    println!("Keytab name: FILE:{}", name);

    if ARGS.show_time {
        println!(
            "KVNO Timestamp{} Principal",
            " ".repeat(*TIMESTAMP_WIDTH - "Timestamp".len())
        );
        println!(
            "{} {} {}",
            "-".repeat(4),
            "-".repeat(*TIMESTAMP_WIDTH),
            "-".repeat(73 - *TIMESTAMP_WIDTH)
        );
    } else {
        println!("KVNO Principal");
        println!("{} {}", "-".repeat(4), "-".repeat(74));
    }

    for entry in keytab.entries() {
        print!("{:>4} ", entry.vno);
        if ARGS.show_time {
            let timestamp = Utc
                .timestamp_opt(entry.timestamp.into(), 0)
                .single()
                .context("keytab entry timestamp out of range")?;
            print!("{} ", StrConv::timestamp_to_sfstring(timestamp));
        }
        print!("{}", entry.principal.unparse_name(0));
        if ARGS.show_etype {
            print!(" ({}) ", entry.key.enctype);
        }
        if ARGS.show_keys {
            let key = entry
                .key
                .contents
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<String>();
            print!(" (0x{})", key);
        }
        println!();
    }

    Ok(())
}

fn do_validate(keytab: Keytab, token: &str) -> anyhow::Result<()> {
    let (realm, spn) = match (&ARGS.realm, &ARGS.spn) {
        (Some(realm), Some(spn)) => (realm.clone(), spn.clone()),
        _ => return usage(),
    };
    let channel_binding = match &ARGS.cb_tlse {
        Some(hash) => Some(
            STANDARD
                .decode(hash)
                .context("--cb-tlse is not valid base64")?,
        ),
        None => None,
    };
    let keytab = keytab
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("{} while encoding keytab", e))?;
    let config = Config::from_record(ConfigRecord {
        realm,
        spn,
        keytab: STANDARD.encode(keytab),
        allow_channel_binding: channel_binding.is_some(),
        clock_skew_sec: ARGS.clockskew,
        ..Default::default()
    })
    .map_err(|e| anyhow::anyhow!("{} while loading configuration", e))?;
    println!(
        "Clock skew: {}",
        StrConv::duration_to_string(config.clock_skew)
    );

    let result = Validator::new(Arc::new(config))
        .validate_at(token, channel_binding.as_deref(), *NOW)
        .map_err(|e| match e.code() {
            Some(code) => anyhow::anyhow!("{} (code {}) while validating token", e, code.code),
            None => anyhow::anyhow!("{} while validating token", e),
        })?;

    println!("Client: {}", result.principal);
    println!("Client realm: {}", result.realm);
    println!("Service: {}", result.spn);
    println!("Key: kvno {} ({})", result.kvno, result.enctype);
    if result.channel_binding_verified {
        println!("Channel binding: verified");
    }
    if result.pac_present {
        println!("Group SIDs:");
        for sid in &result.group_sids {
            println!("\t{}", sid);
        }
    } else {
        println!("No PAC present");
    }
    Ok(())
}
