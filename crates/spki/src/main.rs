use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::Parser;
use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};
use spki::{
    ErrorBody, IssuanceService,
    access::StaticAccess,
    cipher::{self, SECRET_KEY_ENV, SecretCipher},
    cli::{Cli, Command, InitCaArgs, IssueArgs},
    config::{self, Config},
    issuance::{self, build_root_ca},
    request::{IssuanceResponse, LeafRequest, RootRequest},
};
use spki_certs::{CertificatePairError, ca::PEM_LINE_ENDING};
use spki_store::Store;
use spki_telemetry::Tracing;
use tracing::info;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("invalid secret key"))]
    LoadSecretKey { source: cipher::Error },

    #[snafu(display("a secret key is required, set {SECRET_KEY_ENV} or pass --secret-key"))]
    MissingSecretKey,

    #[snafu(display("failed to encrypt the secret"))]
    Encrypt { source: cipher::Error },

    #[snafu(display("failed to decrypt the secret"))]
    Decrypt { source: cipher::Error },

    #[snafu(display("failed to load the configuration"))]
    LoadConfig { source: config::Error },

    #[snafu(display("failed to initialize tracing"))]
    InitTracing {
        source: spki_telemetry::tracing::Error,
    },

    #[snafu(display("failed to read the request from {path:?}"))]
    ReadRequest {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse the request in {path:?}"))]
    ParseRequest {
        source: serde_json::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to open the credential store"))]
    OpenStore { source: spki_store::Error },

    #[snafu(display("failed to issue the certificate"))]
    Issue { source: issuance::Error },

    #[snafu(display("failed to write the CA certificate and private key"))]
    WriteCertificatePair { source: CertificatePairError },

    #[snafu(display("failed to print the output"))]
    PrintOutput { source: serde_json::Error },
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let cipher = cli
        .secret_key
        .as_deref()
        .map(SecretCipher::from_hex)
        .transpose()
        .context(LoadSecretKeySnafu)?;

    let config = match cli.config_path() {
        Some(path) => Config::load(&path, cipher.as_ref()).context(LoadConfigSnafu)?,
        None => Config::default(),
    };

    let _tracing_guard = Tracing::pre_configured(
        env!("CARGO_PKG_NAME"),
        config.log.level.into(),
        cli.telemetry,
    )
    .init()
    .context(InitTracingSnafu)?;

    match cli.command {
        Command::Encrypt { plain } => {
            let cipher = cipher.context(MissingSecretKeySnafu)?;
            println!("{}", cipher.encrypt(&plain).context(EncryptSnafu)?);
        }
        Command::Decrypt { ciphertext } => {
            let cipher = cipher.context(MissingSecretKeySnafu)?;
            println!("{}", *cipher.decrypt(&ciphertext).context(DecryptSnafu)?);
        }
        Command::InitCa(args) => init_ca(&args, &config)?,
        Command::IssueCa(args) => {
            let request: RootRequest = read_request(&args.request)?;
            let service = service(&args, config)?;
            print_outcome(service.init_ca("", &request))?;
        }
        Command::IssueLeaf(args) => {
            let request: LeafRequest = read_request(&args.request)?;
            let service = service(&args, config)?;
            print_outcome(service.issue_leaf("", &request))?;
        }
    }

    Ok(())
}

fn init_ca(args: &InitCaArgs, config: &Config) -> Result<(), Error> {
    let request: RootRequest = read_request(&args.request)?;
    let (_, ca) = build_root_ca(&request, &config.issuance).context(IssueSnafu)?;

    ca.certificate_pair()
        .to_files(&args.cert_out, &args.key_out, PEM_LINE_ENDING)
        .context(WriteCertificatePairSnafu)?;

    info!(
        certificate = %args.cert_out.display(),
        private_key = %args.key_out.display(),
        "wrote the root certificate authority"
    );
    Ok(())
}

fn service(args: &IssueArgs, config: Config) -> Result<IssuanceService<StaticAccess>, Error> {
    let store = Store::open(&config.database.store_options()).context(OpenStoreSnafu)?;
    let access = StaticAccess::new(&args.user_id, &args.account);

    Ok(IssuanceService::new(store, access, config.issuance))
}

fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let contents = fs::read_to_string(path).context(ReadRequestSnafu { path })?;
    serde_json::from_str(&contents).context(ParseRequestSnafu { path })
}

/// Prints the response, or the error body followed by returning the error, as
/// JSON on stdout.
fn print_outcome(outcome: issuance::Result<IssuanceResponse>) -> Result<(), Error> {
    match outcome {
        Ok(response) => print_json(&response),
        Err(error) => {
            print_json(&ErrorBody::from(&error))?;
            Err(error).context(IssueSnafu)
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(value).context(PrintOutputSnafu)?;
    println!("{json}");
    Ok(())
}
