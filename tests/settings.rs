use std::collections::HashSet;

use anyhow::Result;
use renter::{
    config::Config,
    contracts::ContractFilter,
    error::Error,
    hostdb::HostDb,
    persist::{SETTINGS_FILENAME, SettingsStore, parse_settings},
    renter::{Renter, UploadRequest},
    settings::{Allowance, Settings, SettingsError, SettingsHandle},
    test_utils::{MemoryNetwork, TX_FEE, WALLET_BALANCE, test_allowance, test_host_settings},
    types::{Currency, HostKey},
    wallet::LocalWallet,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_settings_file_round_trip() -> Result<()> {
    let dir = TempDir::new()?;
    let store = SettingsStore::new(dir.path());
    assert_eq!(store.load().await?, Settings::default());

    let settings = Settings {
        allowance: test_allowance(),
        period_start: 42,
        stream_cache_size: 7,
        max_download_speed: 1000,
        max_upload_speed: 0,
    };
    store.save(&settings).await?;
    assert_eq!(store.load().await?, settings);
    assert_eq!(store.path(), dir.path().join(SETTINGS_FILENAME));

    let text = std::fs::read_to_string(store.path())?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(value["settings"]["allowance"]["funds"], "1000000");
    Ok(())
}

#[test]
fn test_legacy_settings_with_header() -> Result<()> {
    let text = r#""Renter Persistence"
"0.4"
{
    "Allowance": {
        "Funds": "5000",
        "Hosts": 2,
        "Period": 100,
        "RenewWindow": 10
    },
    "CurrentPeriod": 40,
    "StreamCacheSize": 0,
    "MaxDownloadSpeed": -1,
    "MaxUploadSpeed": 300
}
"#;
    let settings = parse_settings(text)?;
    assert_eq!(
        settings.allowance,
        Allowance {
            funds: Currency::new(5000),
            hosts: 2,
            period: 100,
            renew_window: 10,
        }
    );
    assert_eq!(settings.period_start, 40);
    // zero means unset in old files
    assert_eq!(settings.stream_cache_size, 2);
    assert_eq!(settings.max_download_speed, 0);
    assert_eq!(settings.max_upload_speed, 300);
    Ok(())
}

#[test]
fn test_legacy_settings_with_missing_fields() -> Result<()> {
    let settings = parse_settings(r#"{"Allowance": {"Funds": 10, "Hosts": 1}}"#)?;
    assert_eq!(settings.allowance.funds, Currency::new(10));
    assert_eq!(settings.allowance.period, 0);
    assert_eq!(settings.stream_cache_size, 2);
    assert_eq!(settings.period_start, 0);

    assert!(parse_settings("").is_err());
    assert!(parse_settings("{not json").is_err());
    Ok(())
}

#[tokio::test]
async fn test_unreadable_settings_file_is_an_error() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(dir.path().join(SETTINGS_FILENAME), "[1, 2")?;
    assert!(SettingsStore::new(dir.path()).load().await.is_err());
    Ok(())
}

#[test]
fn test_allowance_validation() {
    let handle = SettingsHandle::new(Settings::default());
    let valid = test_allowance();
    let cases = [
        (
            Allowance {
                funds: Currency::ZERO,
                ..valid
            },
            SettingsError::ZeroFunds,
        ),
        (Allowance { hosts: 0, ..valid }, SettingsError::ZeroHosts),
        (Allowance { period: 0, ..valid }, SettingsError::ZeroPeriod),
        (
            Allowance {
                renew_window: 50,
                ..valid
            },
            SettingsError::RenewWindowTooLarge {
                renew_window: 50,
                period: 50,
            },
        ),
    ];
    for (allowance, expected) in cases {
        assert_eq!(handle.set_allowance(allowance, 5), Err(expected));
    }
    assert_eq!(*handle.snapshot(), Settings::default());
}

#[test]
fn test_period_start_is_kept_across_allowance_changes() -> Result<()> {
    let handle = SettingsHandle::new(Settings::default());
    assert_eq!(handle.set_allowance(test_allowance(), 7)?.period_start, 7);
    let bigger = Allowance {
        funds: Currency::new(2_000_000),
        ..test_allowance()
    };
    assert_eq!(handle.set_allowance(bigger, 20)?.period_start, 7);

    handle.cancel_allowance()?;
    assert_eq!(
        handle.cancel_allowance(),
        Err(SettingsError::AlreadyCancelled)
    );
    assert_eq!(handle.set_allowance(test_allowance(), 30)?.period_start, 30);
    Ok(())
}

#[test]
fn test_period_advances_by_period_minus_renew_window() -> Result<()> {
    let handle = SettingsHandle::new(Settings::default());
    handle.set_allowance(test_allowance(), 0)?;
    assert_eq!(handle.advance_period(29), None);
    assert_eq!(handle.advance_period(30), Some(30));
    assert_eq!(handle.advance_period(30), None);
    // several periods at once
    assert_eq!(handle.advance_period(125), Some(120));
    assert_eq!(handle.snapshot().period_start, 120);

    handle.cancel_allowance()?;
    assert_eq!(handle.advance_period(500), None);
    Ok(())
}

fn config(dir: &TempDir) -> Config {
    Config {
        data_dir: dir.path().to_path_buf(),
        host_window_size: 5,
        maturity_delay: 3,
        piece_size: 64,
        ..Config::new_na()
    }
}

async fn open(
    config: &Config,
    network: &MemoryNetwork,
    hostdb: &HostDb,
) -> Result<Renter<MemoryNetwork, LocalWallet>> {
    let wallet = LocalWallet::new(Currency::new(WALLET_BALANCE), Currency::new(TX_FEE));
    Ok(Renter::open(
        config,
        hostdb.clone(),
        network.clone(),
        wallet,
        CancellationToken::new(),
    )
    .await?)
}

#[tokio::test]
async fn test_renter_state_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config(&dir);
    let network = MemoryNetwork::new();
    let hostdb = HostDb::new();
    for i in 0..3 {
        let key = HostKey::new(format!("host-{}", i));
        hostdb.announce(network.add_host(&key, test_host_settings()));
    }
    let data: Vec<u8> = (0..150u8).collect();
    let source = dir.path().join("source.bin");
    std::fs::write(&source, &data)?;

    let ids: HashSet<_> = {
        let renter = open(&config, &network, &hostdb).await?;
        renter.set_allowance(test_allowance()).await?;
        renter.set_stream_cache_size(5).await?;
        renter.process_block(1).await?;
        renter
            .upload(UploadRequest {
                path: "docs/report.pdf".to_string(),
                source: source.clone(),
                data_pieces: 2,
                parity_pieces: 1,
            })
            .await?;
        renter
            .contracts_by_filter(ContractFilter::Active)
            .await
            .into_iter()
            .map(|v| v.contract.id)
            .collect()
    };
    assert_eq!(ids.len(), 3);

    let renter = open(&config, &network, &hostdb).await?;
    let settings = renter.settings();
    assert_eq!(settings.allowance, test_allowance());
    assert_eq!(settings.stream_cache_size, 5);
    assert_eq!(renter.cache().capacity(), 5);

    let restored: HashSet<_> = renter
        .contracts_by_filter(ContractFilter::Active)
        .await
        .into_iter()
        .map(|v| v.contract.id)
        .collect();
    assert_eq!(restored, ids);

    let info = renter.file_info("docs/report.pdf").await?;
    assert_eq!(info.file_size, 150);
    assert_eq!(info.redundancy, 1.5);
    assert_eq!(renter.download("docs/report.pdf").await?, data);

    renter.delete_file("docs/report.pdf").await?;
    let reopened = open(&config, &network, &hostdb).await?;
    assert!(matches!(
        reopened.file_info("docs/report.pdf").await,
        Err(Error::FileNotFound(_))
    ));
    assert_eq!(
        reopened.contracts_by_filter(ContractFilter::All).await.len(),
        3
    );
    Ok(())
}
