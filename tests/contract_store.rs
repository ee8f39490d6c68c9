use std::collections::HashSet;

use anyhow::Result;
use renter::{
    contracts::{
        Contract, ContractFilter, ContractStore, LifecycleState, SpendingKind, StoreError,
    },
    types::{ContractId, Currency, HostKey},
};

fn contract(host: &str, nonce: u64) -> Contract {
    let host_key = HostKey::new(host);
    Contract::builder()
        .id(ContractId::derive(&host_key, 10, nonce))
        .host_address(format!("mem://{}", host))
        .host_key(host_key)
        .start_height(10)
        .end_height(60)
        .total_cost(Currency::new(1_000))
        .renter_funds(Currency::new(985))
        .fees(Currency::new(15))
        .build()
}

async fn ids(store: &ContractStore, filter: ContractFilter) -> HashSet<ContractId> {
    store
        .list(filter)
        .await
        .into_iter()
        .map(|v| v.contract.id)
        .collect()
}

#[tokio::test]
async fn test_renewal_swaps_active_contract() -> Result<()> {
    let store = ContractStore::new();
    let old = contract("a", 1);
    store.insert(old.clone()).await?;

    let renewed = contract("a", 2);
    store.renew(&old.id, renewed.clone()).await?;

    assert_eq!(ids(&store, ContractFilter::Active).await, HashSet::from([renewed.id]));
    assert_eq!(ids(&store, ContractFilter::Inactive).await, HashSet::from([old.id]));
    assert!(ids(&store, ContractFilter::Expired).await.is_empty());
    assert_eq!(store.snapshot().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_renewal_rejects_bad_replacements() -> Result<()> {
    let store = ContractStore::new();
    let old = contract("a", 1);
    store.insert(old.clone()).await?;

    let other_host = contract("b", 2);
    assert!(matches!(
        store.renew(&old.id, other_host).await,
        Err(StoreError::HostMismatch { .. })
    ));

    let mut spent = contract("a", 3);
    spent.upload_spending = Currency::new(1);
    assert_eq!(
        store.renew(&old.id, spent.clone()).await,
        Err(StoreError::NonZeroSpending(spent.id))
    );

    assert_eq!(
        store.renew(&old.id, old.clone()).await,
        Err(StoreError::Duplicate(old.id))
    );

    // nothing changed
    assert_eq!(ids(&store, ContractFilter::Active).await, HashSet::from([old.id]));
    assert_eq!(store.snapshot().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_no_backward_or_skipping_transitions() -> Result<()> {
    let store = ContractStore::new();
    let c = contract("a", 1);
    store.insert(c.clone()).await?;

    assert!(matches!(
        store.expire(&c.id).await,
        Err(StoreError::InvalidTransition {
            from: LifecycleState::Active,
            to: LifecycleState::Expired,
            ..
        })
    ));

    store.deactivate(&c.id).await?;
    assert!(matches!(
        store.deactivate(&c.id).await,
        Err(StoreError::InvalidTransition { .. })
    ));
    assert!(matches!(
        store.renew(&c.id, contract("a", 2)).await,
        Err(StoreError::InvalidTransition { .. })
    ));

    let expired = store.expire(&c.id).await?;
    assert_eq!(expired.id, c.id);
    assert_eq!(
        store.get(&c.id).await.map(|v| v.state),
        Some(LifecycleState::Expired)
    );
    assert!(store.expire(&c.id).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_upload_lease_pins_contract() -> Result<()> {
    let store = ContractStore::new();
    let c = contract("a", 1);
    store.insert(c.clone()).await?;

    let lease = store.lease_for_upload(&c.id).await?;
    assert!(store.is_leased(&c.id));
    assert_eq!(store.deactivate(&c.id).await, Err(StoreError::Busy(c.id)));
    assert_eq!(
        store.renew(&c.id, contract("a", 2)).await,
        Err(StoreError::Busy(c.id))
    );

    drop(lease);
    assert!(!store.is_leased(&c.id));
    store.deactivate(&c.id).await?;
    assert_eq!(
        store.lease_for_upload(&c.id).await.err(),
        Some(StoreError::NotUsable(c.id))
    );
    Ok(())
}

#[tokio::test]
async fn test_lease_requires_good_for_upload() -> Result<()> {
    let store = ContractStore::new();
    let c = contract("a", 1);
    store.insert(c.clone()).await?;
    store.set_flags(&c.id, false, true).await?;
    assert_eq!(
        store.lease_for_upload(&c.id).await.err(),
        Some(StoreError::NotUsable(c.id))
    );
    Ok(())
}

#[tokio::test]
async fn test_spending_moves_renter_funds() -> Result<()> {
    let store = ContractStore::new();
    let c = contract("a", 1);
    store.insert(c.clone()).await?;

    store
        .record_spending(&c.id, SpendingKind::Upload, Currency::new(100))
        .await?;
    store
        .record_spending(&c.id, SpendingKind::Download, Currency::new(50))
        .await?;
    store
        .record_spending(&c.id, SpendingKind::Storage, Currency::new(35))
        .await?;

    let view = store.get(&c.id).await.expect("contract");
    assert_eq!(view.contract.renter_funds, Currency::new(800));
    assert_eq!(view.contract.spending(), Currency::new(185));
    assert_eq!(
        view.contract.renter_funds + view.contract.fees + view.contract.spending(),
        view.contract.total_cost
    );

    assert!(matches!(
        store
            .record_spending(&c.id, SpendingKind::Upload, Currency::new(801))
            .await,
        Err(StoreError::InsufficientFunds { .. })
    ));

    store.deactivate(&c.id).await?;
    store
        .record_spending(&c.id, SpendingKind::Download, Currency::new(1))
        .await?;
    store.expire(&c.id).await?;
    assert_eq!(
        store
            .record_spending(&c.id, SpendingKind::Download, Currency::new(1))
            .await,
        Err(StoreError::NotUsable(c.id))
    );
    Ok(())
}

#[tokio::test]
async fn test_one_renewal_per_host() -> Result<()> {
    let store = ContractStore::new();
    let a = HostKey::new("a");
    let guard = store.begin_renewal(&a).expect("first claim");
    assert!(store.begin_renewal(&a).is_none());
    assert!(store.begin_renewal(&HostKey::new("b")).is_some());
    drop(guard);
    assert!(store.begin_renewal(&a).is_some());
    Ok(())
}

#[tokio::test]
async fn test_renew_failures_accumulate() -> Result<()> {
    let store = ContractStore::new();
    let c = contract("a", 1);
    store.insert(c.clone()).await?;
    assert_eq!(store.record_renew_failure(&c.id).await?, 1);
    assert_eq!(store.record_renew_failure(&c.id).await?, 2);
    assert_eq!(
        store.record_renew_failure(&ContractId::hash(b"missing")).await,
        Err(StoreError::NotFound(ContractId::hash(b"missing")))
    );
    Ok(())
}

#[tokio::test]
async fn test_no_lease_while_host_renews() -> Result<()> {
    let store = ContractStore::new();
    let a = contract("a", 1);
    let b = contract("b", 1);
    store.insert(a.clone()).await?;
    store.insert(b.clone()).await?;

    let guard = store.begin_renewal(&a.host_key).expect("claim");
    assert_eq!(
        store.lease_for_upload(&a.id).await.err(),
        Some(StoreError::Busy(a.id))
    );
    // other hosts are unaffected
    let lease = store.lease_for_upload(&b.id).await?;
    assert!(!store.is_leased(&a.id));
    store.renew(&a.id, contract("a", 2)).await?;
    drop(guard);

    // the renewed contract takes leases again, the old one never does
    let renewed = contract("a", 2);
    store.lease_for_upload(&renewed.id).await?;
    assert_eq!(
        store.lease_for_upload(&a.id).await.err(),
        Some(StoreError::NotUsable(a.id))
    );
    drop(lease);
    Ok(())
}
