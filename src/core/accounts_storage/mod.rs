use std::collections::btree_map::{self, BTreeMap};
use std::collections::HashMap;

use anyhow::Result;
use ever_utils::*;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard};

use super::storage_schema::{ScopedStorage, StorageSchema};
use super::ton_wallet::ContractType;

const STORAGE_ACCOUNT_ENTRIES: &str = "accountEntries";
const STORAGE_SELECTED_ACCOUNT: &str = "selectedAccountAddress";
const STORAGE_SELECTED_MASTER_KEY: &str = "selectedMasterKey";
const STORAGE_ACCOUNTS_VISIBILITY: &str = "accountsVisibility";
const STORAGE_EXTERNAL_ACCOUNTS: &str = "externalAccounts";

/// Durable account records
pub struct AccountsStorage {
    storage: ScopedStorage,
    data: RwLock<AccountsData>,
}

type AssetsMap = BTreeMap<Address, AssetsList>;

#[derive(Default)]
pub struct AccountsData {
    accounts: AssetsMap,
    selected_account: Option<Address>,
    selected_master_key: Option<UInt256>,
    accounts_visibility: HashMap<Address, bool>,
    external_accounts: Vec<ExternalAccount>,
}

impl AccountsStorage {
    /// Adds the durable keys of the accounts storage
    pub fn register(schema: StorageSchema) -> StorageSchema {
        schema
            .durable(STORAGE_ACCOUNT_ENTRIES)
            .durable(STORAGE_SELECTED_ACCOUNT)
            .durable(STORAGE_SELECTED_MASTER_KEY)
            .durable(STORAGE_ACCOUNTS_VISIBILITY)
            .durable(STORAGE_EXTERNAL_ACCOUNTS)
    }

    /// Loads full accounts storage state. Fails on invalid data
    pub async fn load(storage: ScopedStorage) -> Result<Self> {
        let accounts: AssetsMap = storage
            .get(STORAGE_ACCOUNT_ENTRIES)
            .await?
            .unwrap_or_default();

        let selected_account = storage
            .get::<Address>(STORAGE_SELECTED_ACCOUNT)
            .await?
            .filter(|address| accounts.contains_key(address))
            .or_else(|| accounts.keys().next().copied());

        let data = AccountsData {
            selected_account,
            selected_master_key: storage.get(STORAGE_SELECTED_MASTER_KEY).await?,
            accounts_visibility: storage
                .get(STORAGE_ACCOUNTS_VISIBILITY)
                .await?
                .unwrap_or_default(),
            external_accounts: storage
                .get(STORAGE_EXTERNAL_ACCOUNTS)
                .await?
                .unwrap_or_default(),
            accounts,
        };

        Ok(Self {
            storage,
            data: RwLock::new(data),
        })
    }

    /// Loads full accounts storage state. Returns empty state on invalid data
    pub async fn load_unchecked(storage: ScopedStorage) -> Self {
        match Self::load(storage.clone()).await {
            Ok(accounts_storage) => accounts_storage,
            Err(e) => {
                log::error!("Failed to load accounts storage: {:?}", e);
                Self {
                    storage,
                    data: Default::default(),
                }
            }
        }
    }

    /// Adds account. The first account is selected automatically
    pub async fn add_account(
        &self,
        name: &str,
        address: Address,
        public_key: UInt256,
        contract: ContractType,
    ) -> Result<AssetsList> {
        let data = &mut *self.data.write().await;
        let assets_list = match data.accounts.entry(address) {
            btree_map::Entry::Occupied(_) => {
                return Err(AccountsStorageError::AccountAlreadyExists.into())
            }
            btree_map::Entry::Vacant(entry) => entry
                .insert(AssetsList {
                    name: name.to_owned(),
                    ton_wallet: TonWalletAsset {
                        address,
                        public_key,
                        contract,
                    },
                    additional_assets: Default::default(),
                })
                .clone(),
        };
        self.save_entries(&data.accounts).await?;

        if data.selected_account.is_none() {
            data.selected_account = Some(address);
            self.storage.set(STORAGE_SELECTED_ACCOUNT, &address).await?;
        }

        Ok(assets_list)
    }

    /// Removes the account and resets the selected account if needed
    pub async fn remove_account(&self, address: &Address) -> Result<Option<AssetsList>> {
        let data = &mut *self.data.write().await;
        let result = data.accounts.remove(address);
        if result.is_none() {
            return Ok(None);
        }
        self.save_entries(&data.accounts).await?;

        if data.selected_account.as_ref() == Some(address) {
            data.selected_account = data.accounts.keys().next().copied();
            match &data.selected_account {
                Some(selected) => self.storage.set(STORAGE_SELECTED_ACCOUNT, selected).await?,
                None => self.storage.remove(STORAGE_SELECTED_ACCOUNT).await?,
            }
        }

        if data.accounts_visibility.remove(address).is_some() {
            self.storage
                .set(STORAGE_ACCOUNTS_VISIBILITY, &data.accounts_visibility)
                .await?;
        }

        Ok(result)
    }

    /// Enables the token wallet in the specified network group
    pub async fn add_token_wallet(
        &self,
        address: &Address,
        network_group: &str,
        root_token_contract: Address,
    ) -> Result<AssetsList> {
        let data = &mut *self.data.write().await;

        let (entry, should_save) = match data.accounts.get_mut(address) {
            Some(entry) => {
                let token_wallets = &mut entry
                    .additional_assets
                    .entry(network_group.to_owned())
                    .or_default()
                    .token_wallets;

                let exists = token_wallets
                    .iter()
                    .any(|item| item.root_token_contract == root_token_contract);
                if !exists {
                    token_wallets.push(TokenWalletAsset {
                        root_token_contract,
                    });
                }

                (entry.clone(), !exists)
            }
            None => return Err(AccountsStorageError::AccountNotFound.into()),
        };

        if should_save {
            self.save_entries(&data.accounts).await?;
        }
        Ok(entry)
    }

    /// Disables the token wallet in the specified network group
    pub async fn remove_token_wallet(
        &self,
        address: &Address,
        network_group: &str,
        root_token_contract: &Address,
    ) -> Result<AssetsList> {
        let data = &mut *self.data.write().await;

        let (entry, should_save) = match data.accounts.get_mut(address) {
            Some(entry) => {
                let pos = entry
                    .additional_assets
                    .get_mut(network_group)
                    .and_then(|assets| {
                        let pos = assets
                            .token_wallets
                            .iter()
                            .position(|item| item.root_token_contract == *root_token_contract)?;
                        assets.token_wallets.remove(pos);
                        Some(pos)
                    });

                (entry.clone(), pos.is_some())
            }
            None => return Err(AccountsStorageError::AccountNotFound.into()),
        };

        if should_save {
            self.save_entries(&data.accounts).await?;
        }
        Ok(entry)
    }

    pub async fn select_account(&self, address: &Address) -> Result<AssetsList> {
        let data = &mut *self.data.write().await;
        let assets_list = match data.accounts.get(address) {
            Some(list) => list.clone(),
            None => return Err(AccountsStorageError::AccountNotFound.into()),
        };

        data.selected_account = Some(*address);
        self.storage.set(STORAGE_SELECTED_ACCOUNT, address).await?;
        Ok(assets_list)
    }

    pub async fn set_selected_master_key(&self, master_key: Option<UInt256>) -> Result<()> {
        let data = &mut *self.data.write().await;
        data.selected_master_key = master_key;
        match &master_key {
            Some(master_key) => {
                self.storage
                    .set(STORAGE_SELECTED_MASTER_KEY, master_key)
                    .await
            }
            None => self.storage.remove(STORAGE_SELECTED_MASTER_KEY).await,
        }
    }

    /// Merges visibility flags into the stored ones
    pub async fn set_accounts_visibility(&self, visibility: HashMap<Address, bool>) -> Result<()> {
        let data = &mut *self.data.write().await;
        data.accounts_visibility.extend(visibility);
        self.storage
            .set(STORAGE_ACCOUNTS_VISIBILITY, &data.accounts_visibility)
            .await
    }

    /// Links the account to the additional public keys
    pub async fn add_external_account(&self, account: ExternalAccount) -> Result<()> {
        let data = &mut *self.data.write().await;

        match data
            .external_accounts
            .iter_mut()
            .find(|item| item.address == account.address)
        {
            Some(item) => {
                for key in account.external_in {
                    if !item.external_in.contains(&key) {
                        item.external_in.push(key);
                    }
                }
            }
            None => data.external_accounts.push(account),
        }

        self.storage
            .set(STORAGE_EXTERNAL_ACCOUNTS, &data.external_accounts)
            .await
    }

    /// Removes all accounts and resets selection
    pub async fn clear(&self) -> Result<()> {
        let data = &mut *self.data.write().await;
        *data = Default::default();

        for key in [
            STORAGE_ACCOUNT_ENTRIES,
            STORAGE_SELECTED_ACCOUNT,
            STORAGE_SELECTED_MASTER_KEY,
            STORAGE_ACCOUNTS_VISIBILITY,
            STORAGE_EXTERNAL_ACCOUNTS,
        ] {
            self.storage.remove(key).await?;
        }
        Ok(())
    }

    /// Returns handler to the inner data
    pub async fn stored_data(&'_ self) -> StoredAccountsData<'_> {
        StoredAccountsData(self.data.read().await)
    }

    async fn save_entries(&self, accounts: &AssetsMap) -> Result<()> {
        self.storage.set(STORAGE_ACCOUNT_ENTRIES, accounts).await
    }
}

pub struct StoredAccountsData<'a>(RwLockReadGuard<'a, AccountsData>);

impl<'a> StoredAccountsData<'a> {
    pub fn accounts(&self) -> &AssetsMap {
        &self.0.accounts
    }

    pub fn selected_account(&self) -> Option<&Address> {
        self.0.selected_account.as_ref()
    }

    pub fn selected_master_key(&self) -> Option<&UInt256> {
        self.0.selected_master_key.as_ref()
    }

    pub fn accounts_visibility(&self) -> &HashMap<Address, bool> {
        &self.0.accounts_visibility
    }

    pub fn external_accounts(&self) -> &[ExternalAccount] {
        &self.0.external_accounts
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetsList {
    pub name: String,
    pub ton_wallet: TonWalletAsset,
    /// Network group -> assets
    #[serde(default)]
    pub additional_assets: HashMap<String, AdditionalAssets>,
}

impl AssetsList {
    pub fn address(&self) -> &Address {
        &self.ton_wallet.address
    }

    /// Enabled token wallets in the specified network group
    pub fn token_wallets(&self, network_group: &str) -> &[TokenWalletAsset] {
        self.additional_assets
            .get(network_group)
            .map(|assets| assets.token_wallets.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TonWalletAsset {
    pub address: Address,
    pub public_key: UInt256,
    pub contract: ContractType,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalAssets {
    pub token_wallets: Vec<TokenWalletAsset>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenWalletAsset {
    pub root_token_contract: Address,
}

/// Account which is controlled by keys from another master key
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccount {
    pub address: Address,
    pub public_key: UInt256,
    pub external_in: Vec<UInt256>,
}

#[derive(thiserror::Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccountsStorageError {
    #[error("Account already exists")]
    AccountAlreadyExists,
    #[error("Account not found")]
    AccountNotFound,
}
