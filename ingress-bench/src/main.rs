use envconfig::Envconfig;
use ingress_bench::config::{load_test_cases, RunnerConfig};
use ingress_bench::driver::WrkDriver;
use ingress_bench::runner::{Runner, Session};
use ingress_bench::sink::{LocalIndexer, OpenSearchIndexer, ResultSink};
use ingress_bench::tuning::IngressTuner;
use ingress_bench::init_tracing;
use kube::Client;
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // Ensure rustls uses the aws-lc-rs provider explicitly.
    // This avoids runtime errors when no default provider is set.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    ) {
        // It's fine if a compatible provider was already installed.
        tracing::debug!(
            ?e,
            "CryptoProvider already installed or incompatible; proceeding"
        );
    }

    let cfg = RunnerConfig::init_from_env()?;
    cfg.validate()?;
    let cases = load_test_cases(&cfg.test_case_path)?;
    info!(ns = %cfg.namespace, cases = cases.len(), "starting ingress benchmark");

    let client = Client::try_default().await?;
    let session = Session::connect(client.clone()).await?;

    let sink = match (&cfg.es_server, &cfg.results_dir) {
        (Some(server), _) => Some(ResultSink::streaming(OpenSearchIndexer::new(
            server.clone(),
            cfg.es_index.clone(),
        )?)),
        (None, Some(dir)) => Some(ResultSink::batch(LocalIndexer::new(dir))),
        (None, None) => None,
    };

    let driver = WrkDriver::new(client.clone(), session.ops.clone(), cfg.namespace.clone());
    let tuner = IngressTuner::new(client);
    let mut runner = Runner::new(&cfg);
    runner
        .run(&session, &driver, &tuner, None, sink, cases)
        .await?;
    info!(uuid = %runner.run_uuid(), "benchmark run finished");
    Ok(())
}
