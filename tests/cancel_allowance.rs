use std::collections::HashSet;

use anyhow::Result;
use renter::{
    contracts::ContractFilter,
    error::Error,
    history::DownloadOutcome,
    renter::UploadRequest,
    settings::SettingsError,
    test_utils::{WALLET_BALANCE, test_allowance, test_renter},
    types::Currency,
    wallet::Wallet,
};
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_cancel_retires_contracts_but_keeps_downloads() -> Result<()> {
    let t = test_renter(3);
    t.renter.set_allowance(test_allowance()).await?;
    t.renter.process_block(1).await?;

    let data: Vec<u8> = (0..100u8).collect();
    let source = NamedTempFile::new()?;
    std::fs::write(source.path(), &data)?;
    t.renter
        .upload(UploadRequest {
            path: "a.bin".to_string(),
            source: source.path().to_path_buf(),
            data_pieces: 1,
            parity_pieces: 2,
        })
        .await?;

    t.renter.cancel_allowance().await?;
    assert!(!t.renter.settings().allowance.is_active());
    assert!(matches!(
        t.renter.cancel_allowance().await,
        Err(Error::Settings(SettingsError::AlreadyCancelled))
    ));

    t.renter.process_block(2).await?;
    assert!(t
        .renter
        .contracts_by_filter(ContractFilter::Active)
        .await
        .is_empty());
    let inactive = t.renter.contracts_by_filter(ContractFilter::Inactive).await;
    assert_eq!(inactive.len(), 3);
    assert!(inactive
        .iter()
        .all(|v| !v.contract.good_for_upload && !v.contract.good_for_renew));

    // Inactive contracts still serve their pieces
    assert_eq!(t.renter.download("a.bin").await?, data);
    assert!(t.renter.file_info("a.bin").await?.available);

    let other = NamedTempFile::new()?;
    std::fs::write(other.path(), b"late")?;
    assert!(matches!(
        t.renter
            .upload(UploadRequest {
                path: "b.bin".to_string(),
                source: other.path().to_path_buf(),
                data_pieces: 1,
                parity_pieces: 1,
            })
            .await,
        Err(Error::NoAllowance)
    ));

    // no replacements are formed without an allowance
    t.renter.process_block(3).await?;
    assert_eq!(
        t.renter.contracts_by_filter(ContractFilter::All).await.len(),
        3
    );
    Ok(())
}

#[tokio::test]
async fn test_cancelled_contracts_expire_and_release_funds() -> Result<()> {
    let t = test_renter(3);
    t.renter.set_allowance(test_allowance()).await?;
    t.renter.process_block(1).await?;

    let data = vec![9u8; 40];
    let source = NamedTempFile::new()?;
    std::fs::write(source.path(), &data)?;
    t.renter
        .upload(UploadRequest {
            path: "a.bin".to_string(),
            source: source.path().to_path_buf(),
            data_pieces: 1,
            parity_pieces: 2,
        })
        .await?;
    t.renter.cancel_allowance().await?;
    t.renter.process_block(2).await?;
    t.renter.download("a.bin").await?;

    // maturity is 50 + 5 + 3
    t.renter.process_block(58).await?;
    assert_eq!(
        t.renter.contracts_by_filter(ContractFilter::Inactive).await.len(),
        3
    );
    t.renter.process_block(59).await?;
    let expired = t.renter.contracts_by_filter(ContractFilter::Expired).await;
    assert_eq!(expired.len(), 3);

    let remaining: Currency = expired.iter().map(|v| v.contract.renter_funds).sum();
    let spent: Currency = expired
        .iter()
        .map(|v| v.contract.fees + v.contract.spending())
        .sum();
    let balance = t.wallet.confirmed_balance().await;
    assert_eq!(
        balance,
        Currency::new(WALLET_BALANCE - 3 * 111_111) + remaining
    );
    let metrics = t.renter.financial_metrics().await;
    assert_eq!(metrics.previous_spending, spent);
    assert!(metrics.total_allocated.is_zero());
    metrics.reconcile_wallet(Currency::new(WALLET_BALANCE), balance)?;

    let err = t.renter.download("a.bin").await.unwrap_err();
    assert!(matches!(err, Error::Unrecoverable { available: 0, .. }));
    assert!(!t.renter.file_info("a.bin").await?.available);
    // the local copy still exists
    assert!(t.renter.file_info("a.bin").await?.recoverable);

    let history = t.renter.history().list();
    assert_eq!(history.len(), 2);
    assert!(matches!(history[0].outcome, DownloadOutcome::Failed(_)));
    assert_eq!(history[1].outcome, DownloadOutcome::Completed);
    Ok(())
}

#[tokio::test]
async fn test_reset_allowance_restores_health() -> Result<()> {
    let t = test_renter(3);
    t.renter.set_allowance(test_allowance()).await?;
    t.renter.process_block(1).await?;

    let data: Vec<u8> = (0..100u8).collect();
    let source = NamedTempFile::new()?;
    std::fs::write(source.path(), &data)?;
    t.renter
        .upload(UploadRequest {
            path: "a.bin".to_string(),
            source: source.path().to_path_buf(),
            data_pieces: 1,
            parity_pieces: 2,
        })
        .await?;
    let before = t.renter.file_info("a.bin").await?;
    assert_eq!(before.redundancy, 3.0);

    t.renter.cancel_allowance().await?;
    t.renter.process_block(2).await?;
    assert_eq!(t.renter.file_info("a.bin").await?.redundancy, 0.0);

    // the same hosts come back under new contracts
    t.renter.set_allowance(test_allowance()).await?;
    assert_eq!(t.renter.settings().period_start, 2);
    t.renter.process_block(3).await?;
    let active = t.renter.contracts_by_filter(ContractFilter::Active).await;
    assert_eq!(active.len(), 3);
    assert!(active.iter().all(|v| v.contract.good_for_upload));
    assert_eq!(
        t.renter.contracts_by_filter(ContractFilter::Inactive).await.len(),
        3
    );

    let info = t.renter.file_info("a.bin").await?;
    assert_eq!(info.redundancy, 3.0);
    // 2 chunks of 3 pieces uploaded once and repaired once
    assert_eq!(t.network.uploads(), 12);

    // the retired contracts alone no longer serve the file
    let file = t.renter.files().get("a.bin").expect("tracked");
    let current: HashSet<_> = active.iter().map(|v| v.contract.id).collect();
    assert!(file.chunks.iter().all(|c| c
        .pieces
        .iter()
        .all(|p| p.iter().any(|l| current.contains(&l.contract_id)))));
    assert_eq!(t.renter.download("a.bin").await?, data);

    let metrics = t.renter.financial_metrics().await;
    metrics.reconcile(test_allowance().funds)?;
    metrics.reconcile_wallet(
        Currency::new(WALLET_BALANCE),
        t.wallet.confirmed_balance().await,
    )?;
    Ok(())
}
