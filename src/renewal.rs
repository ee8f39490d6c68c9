use std::collections::HashSet;

use futures_util::{StreamExt, stream};
use tracing::{debug, info, warn};

use crate::{
    config::Policy,
    contracts::{Contract, ContractFilter, ContractView, LifecycleState},
    error::{Error, Result},
    hostdb::HostEntry,
    renter::Renter,
    settings::Settings,
    transport::{self, ContractTerms, HostTransport, Request, TransportError},
    types::{BlockHeight, ContractId, Currency, HostKey},
    wallet::{FundingRequest, Wallet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalKind {
    /// The contract ends within the renew window; the renewal extends it to
    /// the end of the current period.
    Window,
    /// The contract ran low on funds; the renewal keeps its end height.
    Spending,
}

/// Active, renewable contracts that need renewing at `height`.
pub fn plan(
    contracts: &[ContractView],
    height: BlockHeight,
    settings: &Settings,
    policy: &Policy,
) -> Vec<(ContractView, RenewalKind)> {
    contracts
        .iter()
        .filter(|v| v.contract.good_for_renew)
        .filter_map(|v| {
            let c = &v.contract;
            if height + settings.allowance.renew_window >= c.end_height {
                Some((v.clone(), RenewalKind::Window))
            } else if c.renter_funds.ratio(c.total_cost) < policy.spending_renew_threshold {
                Some((v.clone(), RenewalKind::Spending))
            } else {
                None
            }
        })
        .collect()
}

pub fn renewal_end_height(kind: RenewalKind, contract: &Contract, settings: &Settings) -> BlockHeight {
    match kind {
        RenewalKind::Window => settings.period_start + settings.allowance.period,
        RenewalKind::Spending => contract.end_height,
    }
}

/// Renter funds to put in a new contract with a host charging
/// `contract_price`: an even share of the allowance, capped by what is left
/// unallocated, minus the fees.
async fn contract_funding<T: HostTransport, W: Wallet>(
    renter: &Renter<T, W>,
    settings: &Settings,
    contract_price: Currency,
) -> Result<Currency> {
    let allowance = &settings.allowance;
    let metrics = renter.financial_metrics().await;
    let unallocated = allowance.funds.saturating_sub(metrics.total_allocated);
    let share = allowance
        .funds
        .div(allowance.hosts)
        .div(renter.policy.funding_divisor);
    let budget = share.min(unallocated);
    let fees = contract_price + renter.wallet.estimate_fee();
    budget
        .checked_sub(fees)
        .filter(|f| !f.is_zero())
        .ok_or_else(|| {
            Error::Funding(format!(
                "budget {} does not cover fees {} ({} unallocated)",
                budget, fees, unallocated
            ))
        })
}

/// Asks every known host for its settings and updates liveness, then
/// recomputes the usability flags of Active contracts.
pub async fn refresh_hosts<T: HostTransport, W: Wallet>(renter: &Renter<T, W>) -> Result<()> {
    let probes: Vec<_> = stream::iter(renter.hostdb.all())
        .map(|host| async move {
            let result = transport::fetch_settings(&renter.transport, &host.address).await;
            (host.host_key, result)
        })
        .buffer_unordered(renter.policy.probe_concurrency.max(1))
        .collect()
        .await;
    for (host_key, result) in probes {
        match result {
            Ok(settings) => renter.hostdb.set_online(&host_key, true, Some(settings)),
            Err(e) => {
                debug!("Host {} unreachable: {}", host_key, e);
                renter.hostdb.set_online(&host_key, false, None);
            }
        }
    }

    for view in renter.contracts.list(ContractFilter::Active).await {
        let c = &view.contract;
        if c.renew_failures >= renter.policy.renew_failure_threshold {
            continue;
        }
        let online = renter
            .hostdb
            .get(&c.host_key)
            .is_some_and(|h| h.online);
        let funded = c.renter_funds.ratio(c.total_cost) >= renter.policy.spending_renew_threshold;
        renter
            .contracts
            .set_flags(&c.id, online && funded, online)
            .await?;
    }
    Ok(())
}

/// Renews contracts that reached their renew window or ran low on funds.
/// Failed renewals count against the contract; at the failure threshold it
/// stops being used and is retired.
pub async fn renew_contracts<T: HostTransport, W: Wallet>(
    renter: &Renter<T, W>,
    height: BlockHeight,
    settings: &Settings,
) -> Result<()> {
    let active = renter.contracts.list(ContractFilter::Active).await;
    for (view, kind) in plan(&active, height, settings, &renter.policy) {
        let id = view.contract.id;
        match renew(renter, &view.contract, kind, height, settings).await {
            Ok(Some(renewed)) => debug!("{:?} renewal of {} done as {}", kind, id, renewed),
            Ok(None) => debug!("Renewal of {} deferred", id),
            Err(Error::Funding(reason)) => {
                warn!("Cannot fund renewal of {}: {}", id, reason);
                renter
                    .contracts
                    .set_flags(&id, false, view.contract.good_for_renew)
                    .await?;
            }
            Err(e) => {
                let failures = renter.contracts.record_renew_failure(&id).await?;
                warn!(
                    "Failed to renew contract {} with {} ({} failures): {}",
                    id, view.contract.host_key, failures, e
                );
                if failures >= renter.policy.renew_failure_threshold {
                    info!("Retiring contract {} after {} failed renewals", id, failures);
                    renter.contracts.set_flags(&id, false, false).await?;
                    if let Err(e) = renter.contracts.deactivate(&id).await {
                        debug!("Contract {} stays active for now: {}", id, e);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn renew<T: HostTransport, W: Wallet>(
    renter: &Renter<T, W>,
    old: &Contract,
    kind: RenewalKind,
    height: BlockHeight,
    settings: &Settings,
) -> Result<Option<ContractId>> {
    let Some(_guard) = renter.contracts.begin_renewal(&old.host_key) else {
        return Ok(None);
    };
    // Leases taken before the guard pin the contract until they drop; the
    // guard keeps new ones out until the store has swapped the contracts.
    if renter.contracts.is_leased(&old.id) {
        return Ok(None);
    }
    let host = renter
        .hostdb
        .get(&old.host_key)
        .ok_or_else(|| TransportError::Unreachable(old.host_key.to_string()))?;
    let end_height = renewal_end_height(kind, old, settings);
    if end_height <= height {
        return Err(Error::Funding(format!(
            "renewal would end at {} which is not after {}",
            end_height, height
        )));
    }
    let renter_funds = contract_funding(renter, settings, host.settings.contract_price).await?;
    let terms = ContractTerms {
        renter_funds,
        start_height: height,
        end_height,
    };
    transport::negotiate(
        &renter.transport,
        &host.address,
        Request::RenewContract {
            previous: old.id,
            terms,
        },
    )
    .await?;
    let signed = renter
        .wallet
        .fund_and_sign(FundingRequest {
            host_key: host.host_key.clone(),
            start_height: height,
            end_height,
            renter_funds,
            host_fee: host.settings.contract_price,
            renewed_from: Some(old.id),
        })
        .await?;
    let renewed = Contract::builder()
        .id(signed.id)
        .host_key(host.host_key.clone())
        .host_address(host.address.clone())
        .start_height(height)
        .end_height(end_height)
        .total_cost(signed.total_cost)
        .renter_funds(signed.renter_funds)
        .fees(signed.fees)
        .build();
    renter.contracts.renew(&old.id, renewed).await?;
    let moved = renter.files.remap_contract(&old.id, &signed.id);
    debug!("Moved {} piece locations to {}", moved, signed.id);
    Ok(Some(signed.id))
}

/// Moves Active contracts that ended, or that exhausted their renewal
/// attempts, to Inactive.
pub async fn retire_contracts<T: HostTransport, W: Wallet>(
    renter: &Renter<T, W>,
    height: BlockHeight,
) -> Result<()> {
    for view in renter.contracts.list(ContractFilter::Active).await {
        let c = &view.contract;
        let ended = c.end_height <= height;
        let failed = c.renew_failures >= renter.policy.renew_failure_threshold;
        if !ended && !failed {
            continue;
        }
        renter.contracts.set_flags(&c.id, false, false).await?;
        if let Err(e) = renter.contracts.deactivate(&c.id).await {
            debug!("Contract {} stays active for now: {}", c.id, e);
        }
    }
    Ok(())
}

/// Hosts that must not receive a new contract: those already under an
/// Active contract and those that exhausted renewal attempts.
async fn excluded_hosts<T: HostTransport, W: Wallet>(renter: &Renter<T, W>) -> HashSet<HostKey> {
    let threshold = renter.policy.renew_failure_threshold;
    renter
        .contracts
        .snapshot()
        .await
        .into_iter()
        .filter(|v| {
            v.state == LifecycleState::Active
                || v.contract.renew_failures >= threshold
        })
        .map(|v| v.contract.host_key)
        .collect()
}

/// Forms contracts with new hosts until the allowance's host count is met
/// by renewable Active contracts.
pub async fn form_contracts<T: HostTransport, W: Wallet>(
    renter: &Renter<T, W>,
    height: BlockHeight,
    settings: &Settings,
) -> Result<usize> {
    let good = renter
        .contracts
        .list(ContractFilter::Active)
        .await
        .iter()
        .filter(|v| v.contract.good_for_renew)
        .count() as u64;
    let wanted = settings.allowance.hosts.saturating_sub(good);
    if wanted == 0 {
        return Ok(0);
    }
    let exclude = excluded_hosts(renter).await;
    let mut formed = 0;
    for host in renter.hostdb.candidates(&exclude) {
        if formed as u64 == wanted {
            break;
        }
        match form(renter, &host, height, settings).await {
            Ok(_) => formed += 1,
            Err(Error::Funding(reason)) => {
                warn!("Cannot fund new contracts: {}", reason);
                break;
            }
            Err(e) => warn!("Failed to form contract with {}: {}", host.host_key, e),
        }
    }
    if (formed as u64) < wanted {
        warn!(
            "Formed {} of {} wanted contracts at height {}",
            formed, wanted, height
        );
    }
    Ok(formed)
}

async fn form<T: HostTransport, W: Wallet>(
    renter: &Renter<T, W>,
    host: &HostEntry,
    height: BlockHeight,
    settings: &Settings,
) -> Result<Contract> {
    let end_height = settings.period_start + settings.allowance.period;
    if end_height <= height {
        return Err(Error::Funding(format!(
            "period ends at {} which is not after {}",
            end_height, height
        )));
    }
    let renter_funds = contract_funding(renter, settings, host.settings.contract_price).await?;
    let terms = ContractTerms {
        renter_funds,
        start_height: height,
        end_height,
    };
    transport::negotiate(&renter.transport, &host.address, Request::FormContract(terms)).await?;
    let signed = renter
        .wallet
        .fund_and_sign(FundingRequest {
            host_key: host.host_key.clone(),
            start_height: height,
            end_height,
            renter_funds,
            host_fee: host.settings.contract_price,
            renewed_from: None,
        })
        .await?;
    let contract = Contract::builder()
        .id(signed.id)
        .host_key(host.host_key.clone())
        .host_address(host.address.clone())
        .start_height(height)
        .end_height(end_height)
        .total_cost(signed.total_cost)
        .renter_funds(signed.renter_funds)
        .fees(signed.fees)
        .build();
    renter.contracts.insert(contract.clone()).await?;
    Ok(contract)
}

/// Retires every Active contract after the allowance was cancelled.
/// Leased contracts are retired by a later cycle.
pub async fn wind_down<T: HostTransport, W: Wallet>(renter: &Renter<T, W>) -> Result<()> {
    for view in renter.contracts.list(ContractFilter::Active).await {
        let id = view.contract.id;
        renter.contracts.set_flags(&id, false, false).await?;
        if let Err(e) = renter.contracts.deactivate(&id).await {
            debug!("Contract {} stays active for now: {}", id, e);
        }
    }
    Ok(())
}

/// Expires Inactive contracts past their maturity height and returns their
/// unspent funds to the wallet.
pub async fn expire_matured<T: HostTransport, W: Wallet>(
    renter: &Renter<T, W>,
    height: BlockHeight,
) -> Result<()> {
    let (window, delay) = (renter.policy.host_window_size, renter.policy.maturity_delay);
    for view in renter.contracts.list(ContractFilter::Inactive).await {
        if height <= view.contract.maturity_height(window, delay) {
            continue;
        }
        let contract = renter.contracts.expire(&view.contract.id).await?;
        renter.wallet.release(contract.renter_funds).await?;
        info!(
            "Released {} from expired contract {}",
            contract.renter_funds, contract.id
        );
    }
    Ok(())
}
