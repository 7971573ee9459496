//! Selection of the operator account(s) that receive cluster credentials.
//!
//! Matching accounts are collected into an explicit list up front. Exactly one
//! of them is the operator that runs the per-user post-init actions.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};

use crate::core::types::Owner;

/// One passwd entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl Account {
    pub fn owner(&self) -> Owner {
        Owner {
            uid: self.uid,
            gid: self.gid,
        }
    }
}

/// Rules for picking accounts out of the passwd database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPolicy {
    /// Accounts whose name starts with this prefix receive a kubeconfig.
    pub prefix: String,
    /// System accounts below this uid are never selected.
    pub min_uid: u32,
    /// Explicit operator; required when several accounts match the prefix.
    pub operator: Option<String>,
}

/// Accounts selected for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorAccounts {
    /// Runs CNI apply, taint removal, completion setup, and status checks.
    pub operator: Account,
    /// Every account that receives a copy of the admin kubeconfig (operator included).
    pub all: Vec<Account>,
}

/// Parse passwd-format contents (`name:pw:uid:gid:gecos:home:shell`).
pub fn parse_passwd(contents: &str) -> Result<Vec<Account>> {
    let mut accounts = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 {
            bail!("passwd line {}: expected 7 fields", idx + 1);
        }
        let uid = fields[2]
            .parse()
            .with_context(|| format!("passwd line {}: invalid uid", idx + 1))?;
        let gid = fields[3]
            .parse()
            .with_context(|| format!("passwd line {}: invalid gid", idx + 1))?;
        accounts.push(Account {
            name: fields[0].to_string(),
            uid,
            gid,
            home: PathBuf::from(fields[5]),
        });
    }
    Ok(accounts)
}

/// Apply `policy` to the parsed passwd entries.
///
/// Zero or multiple prefix matches without an explicit operator is an error:
/// post-init actions need one unambiguous target.
pub fn select_accounts(accounts: &[Account], policy: &AccountPolicy) -> Result<OperatorAccounts> {
    let mut all: Vec<Account> = accounts
        .iter()
        .filter(|account| account.uid >= policy.min_uid && account.name.starts_with(&policy.prefix))
        .cloned()
        .collect();

    let operator = match &policy.operator {
        Some(name) => {
            let account = accounts
                .iter()
                .find(|account| &account.name == name)
                .ok_or_else(|| anyhow!("operator account '{name}' not found"))?;
            if account.uid < policy.min_uid {
                bail!(
                    "operator account '{name}' has uid {} below min_uid {}",
                    account.uid,
                    policy.min_uid
                );
            }
            if !all.iter().any(|candidate| &candidate.name == name) {
                all.push(account.clone());
            }
            account.clone()
        }
        None => match all.as_slice() {
            [] => bail!("no account matches prefix '{}'", policy.prefix),
            [only] => only.clone(),
            many => {
                let names: Vec<&str> = many.iter().map(|account| account.name.as_str()).collect();
                bail!(
                    "{} accounts match prefix '{}' ({}); set accounts.operator to pick one",
                    many.len(),
                    policy.prefix,
                    names.join(", ")
                );
            }
        },
    };

    Ok(OperatorAccounts { operator, all })
}
