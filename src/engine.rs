//! `Engine`: the crate's single public entry point (spec §6), wrapping the
//! Storage Engine, Schema Registry, Change Stream Broker, Password Policy
//! and lockout table behind the eight directory operations. Mirrors the
//! teacher's `boot.rs` bootstrap shape, generalized from Lix's
//! version/account bootstrapping to this spec's `baseDN`/`ou=users`/
//! `ou=groups` seeding (spec §6 configuration table).

use std::time::SystemTime;

use crate::config::EngineConfig;
use crate::dn::{self, Dn};
use crate::entry::{apply_modification, Entry, Modification};
use crate::error::{
    account_disabled, entry_exists, invalid_credentials, new_superior_not_found, no_parent,
    no_password, not_allowed_on_non_leaf, subtree_move_unsupported, Result,
};
use crate::filter::ast::Filter;
use crate::filter::eval::evaluate;
use crate::op::{self, check_placement, ClusterWriter};
use crate::password::{verify_any, PasswordVerifier, Sha256Verifier};
use crate::planner::plan;
use crate::schema::builtin::builtin_registry;
use crate::schema::registry::SchemaRegistry;
use crate::storage::{Scope, StorageBackend};
use crate::stream::{Broker, ChangeOp, Subscription, SubscriptionFilter};

fn entry_json(entry: &Entry) -> String {
    serde_json::to_string(entry).unwrap_or_default()
}

/// Derives the bootstrap entry for a container DN from its leading RDN
/// attribute (`dc` → `domain`, `ou` → `organizationalUnit`). Returns `None`
/// for any other attribute — bootstrap then leaves that container to be
/// created explicitly by the caller, rather than guessing its schema.
fn container_entry(container_dn: &Dn) -> Option<Entry> {
    let (attr, value) = dn::parse_rdn(&dn::rdn(container_dn)).ok()?;
    let mut entry = Entry::new(container_dn.clone());
    match attr.as_str() {
        "dc" => {
            entry.set_strings("objectclass", vec!["domain".to_string(), "top".to_string()]);
            entry.set_strings("dc", vec![value]);
        }
        "ou" => {
            entry.set_strings(
                "objectclass",
                vec!["organizationalUnit".to_string(), "top".to_string()],
            );
            entry.set_strings("ou", vec![value]);
        }
        _ => return None,
    }
    Some(entry)
}

/// Default secondary indexes a freshly booted engine carries (spec §4.F,
/// §8 S4's "equality index on uid").
const DEFAULT_EQUALITY_INDEXES: &[&str] = &["uid", "mail", "cn"];
const DEFAULT_SUBSTRING_INDEXES: &[&str] = &["cn", "description"];

pub struct Engine {
    config: EngineConfig,
    base_dn: Dn,
    users_base: Dn,
    groups_base: Dn,
    root_dn: Dn,
    root_password_hash: String,
    schema: SchemaRegistry,
    storage: Box<dyn StorageBackend>,
    broker: Broker,
    lockout: crate::password::LockoutTable,
    verifier: Box<dyn PasswordVerifier>,
    cluster_writer: Option<Box<dyn ClusterWriter>>,
}

impl Engine {
    /// Boots an engine over `storage`: loads the built-in schema, hashes
    /// the configured root password, and bootstraps `baseDN`, `ou=users`
    /// and `ou=groups` if missing (spec §6).
    pub async fn boot(config: EngineConfig, storage: Box<dyn StorageBackend>) -> Result<Self> {
        let schema = builtin_registry()?;
        let base_dn = dn::normalize(&config.directory.base_dn)?;
        let users_base = dn::normalize(&format!("ou=users,{}", base_dn.as_str()))?;
        let groups_base = dn::normalize(&format!("ou=groups,{}", base_dn.as_str()))?;
        let root_dn = dn::normalize(&config.directory.root_dn)?;
        let verifier: Box<dyn PasswordVerifier> = Box::new(Sha256Verifier);
        let root_password_hash = verifier.hash(config.directory.root_password.as_bytes());

        for attr in DEFAULT_EQUALITY_INDEXES {
            storage
                .create_index(attr, crate::index::IndexKind::Equality)
                .await?;
        }
        for attr in DEFAULT_SUBSTRING_INDEXES {
            storage
                .create_index(attr, crate::index::IndexKind::Substring)
                .await?;
        }

        let engine = Self {
            config,
            base_dn,
            users_base,
            groups_base,
            root_dn,
            root_password_hash,
            schema,
            storage,
            broker: Broker::default(),
            lockout: crate::password::LockoutTable::new(),
            verifier,
            cluster_writer: None,
        };
        engine.bootstrap_containers().await?;
        Ok(engine)
    }

    pub fn with_cluster_writer(mut self, writer: Box<dyn ClusterWriter>) -> Self {
        self.cluster_writer = Some(writer);
        self
    }

    pub fn with_verifier(mut self, verifier: Box<dyn PasswordVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    async fn bootstrap_containers(&self) -> Result<()> {
        for dn in [&self.base_dn, &self.users_base, &self.groups_base] {
            self.ensure_container(dn).await?;
        }
        Ok(())
    }

    async fn ensure_container(&self, dn: &Dn) -> Result<()> {
        if dn.is_root() {
            return Ok(());
        }
        {
            let txn = self.storage.begin_read().await?;
            let exists = txn.get(dn).is_ok();
            txn.rollback().await?;
            if exists {
                return Ok(());
            }
        }
        let Some(mut entry) = container_entry(dn) else {
            tracing::warn!(dn = %dn.as_str(), "bootstrap: no container schema for this RDN attribute, skipping");
            return Ok(());
        };
        self.schema.validate_entry(&entry)?;
        op::stamp_for_add(&mut entry, SystemTime::now(), &self.root_dn);
        let mut txn = self.storage.begin_write().await?;
        txn.put(entry)?;
        txn.commit().await
    }

    fn bind_dn_or_root(&self, bind_dn: Option<&str>) -> Result<Dn> {
        match bind_dn {
            Some(s) if !s.trim().is_empty() => dn::normalize(s),
            _ => Ok(Dn::root()),
        }
    }

    /// Anonymous bind (empty dn) always succeeds. Root-DN bind compares
    /// against the configured root password through the verifier. Every
    /// other bind fetches the entry, checks `obaDisabled`, then verifies
    /// against each stored `userPassword` value (spec §4.I).
    pub async fn bind(&self, dn: &str, password: &[u8], now: SystemTime) -> Result<()> {
        if dn.trim().is_empty() {
            return Ok(());
        }
        let target = dn::normalize(dn)?;

        if target == self.root_dn {
            return if self.verifier.verify(password, &self.root_password_hash) {
                Ok(())
            } else {
                Err(invalid_credentials("root bind failed"))
            };
        }

        let rate_limit = &self.config.security.rate_limit;
        if rate_limit.enabled {
            self.lockout.check(&target, now, rate_limit.lockout_duration)?;
        }

        let txn = self.storage.begin_read().await?;
        let fetched = txn.get(&target);
        txn.rollback().await?;
        let Ok(entry) = fetched else {
            if rate_limit.enabled {
                self.lockout.record_failure(&target, now, rate_limit.max_attempts);
            }
            return Err(invalid_credentials("no such entry"));
        };

        if op::is_account_disabled(&entry) {
            return Err(account_disabled("account is disabled"));
        }

        let stored = entry
            .get("userpassword")
            .map(|values| values.to_vec())
            .unwrap_or_default();
        if stored.is_empty() {
            return Err(no_password("entry has no userPassword attribute"));
        }

        match verify_any(self.verifier.as_ref(), password, &stored) {
            Ok(()) => {
                self.lockout.record_success(&target);
                Ok(())
            }
            Err(err) => {
                if rate_limit.enabled {
                    self.lockout.record_failure(&target, now, rate_limit.max_attempts);
                }
                Err(err)
            }
        }
    }

    /// Normalizes `baseDN`, lets the planner pick an index (or full scan),
    /// and filters candidates with the residual post-filter (spec §4.I).
    pub async fn search(
        &self,
        base_dn: &str,
        scope: Scope,
        filter: Option<&Filter>,
    ) -> Result<Vec<Entry>> {
        let base = dn::normalize(base_dn)?;
        let txn = self.storage.begin_read().await?;
        let query_plan = filter.map(|f| plan(f, txn.index()));

        let mut results = match query_plan
            .as_ref()
            .and_then(|p| op::candidates_from_plan(txn.index(), p))
        {
            Some(dns) => {
                let mut out = Vec::new();
                for candidate_dn in dns {
                    if !op::dn_matches_scope(&candidate_dn, &base, scope) {
                        continue;
                    }
                    if let Ok(entry) = txn.get(&candidate_dn) {
                        out.push(entry);
                    }
                }
                out
            }
            None => txn.search_by_dn(&base, scope),
        };

        if let Some(post) = query_plan.as_ref().and_then(|p| p.post_filter.as_ref()) {
            results.retain(|e| evaluate(Some(post), Some(e)));
        }
        txn.rollback().await?;
        Ok(results)
    }

    /// Normalizes dn, schema-validates, enforces placement, stamps
    /// operational attributes, then either routes through the
    /// `ClusterWriter` or commits locally (spec §4.I).
    pub async fn add(&self, mut entry: Entry, bind_dn: Option<&str>) -> Result<()> {
        let dn = dn::normalize(entry.dn.as_str())?;
        entry.dn = dn.clone();

        self.schema.validate_entry(&entry)?;
        let object_classes = entry.object_classes();
        check_placement(
            &self.schema,
            &dn,
            &object_classes,
            &self.users_base,
            &self.groups_base,
        )?;

        let creator = self.bind_dn_or_root(bind_dn)?;
        op::stamp_for_add(&mut entry, SystemTime::now(), &creator);

        if let Some(cluster) = &self.cluster_writer {
            cluster.put(&entry).await?;
        } else {
            let mut txn = self.storage.begin_write().await?;
            if txn.get(&dn).is_ok() {
                txn.rollback().await?;
                return Err(entry_exists(dn.as_str().to_string()));
            }
            let parent = dn::parent(&dn);
            if !parent.is_root() && txn.get(&parent).is_err() {
                txn.rollback().await?;
                return Err(no_parent(parent.as_str().to_string()));
            }
            txn.put(entry.clone())?;
            txn.commit().await?;
        }

        self.broker.publish(ChangeOp::Insert, dn, Some(entry_json(&entry)));
        Ok(())
    }

    /// Fetches, applies modifications in order, re-validates schema and
    /// placement, re-stamps, commits, publishes. Zero modifications is a
    /// successful no-op (spec §4.I).
    pub async fn modify(
        &self,
        dn: &str,
        mods: Vec<Modification>,
        bind_dn: Option<&str>,
    ) -> Result<()> {
        if mods.is_empty() {
            return Ok(());
        }
        let target = dn::normalize(dn)?;
        let modifier = self.bind_dn_or_root(bind_dn)?;

        if let Some(cluster) = &self.cluster_writer {
            let txn = self.storage.begin_read().await?;
            let fetched = txn.get(&target);
            txn.rollback().await?;
            let mut entry = fetched?;
            for m in &mods {
                apply_modification(&mut entry, m);
            }
            self.schema.validate_entry(&entry)?;
            check_placement(
                &self.schema,
                &target,
                &entry.object_classes(),
                &self.users_base,
                &self.groups_base,
            )?;
            op::stamp_for_modify(&mut entry, SystemTime::now(), &modifier, 0);
            cluster.put(&entry).await?;
            self.broker
                .publish(ChangeOp::Update, target, Some(entry_json(&entry)));
            return Ok(());
        }

        let mut txn = self.storage.begin_write().await?;
        let mut entry = match txn.get(&target) {
            Ok(e) => e,
            Err(e) => {
                txn.rollback().await?;
                return Err(e);
            }
        };
        for m in &mods {
            apply_modification(&mut entry, m);
        }
        if let Err(e) = self.schema.validate_entry(&entry) {
            txn.rollback().await?;
            return Err(e);
        }
        if let Err(e) = check_placement(
            &self.schema,
            &target,
            &entry.object_classes(),
            &self.users_base,
            &self.groups_base,
        ) {
            txn.rollback().await?;
            return Err(e);
        }
        let child_count = txn.search_by_dn(&target, Scope::One).len();
        op::stamp_for_modify(&mut entry, SystemTime::now(), &modifier, child_count);
        txn.put(entry.clone())?;
        txn.commit().await?;
        self.broker
            .publish(ChangeOp::Update, target, Some(entry_json(&entry)));
        Ok(())
    }

    /// Fails `NotAllowedOnNonLeaf` if the entry has children (spec §4.I).
    pub async fn delete(&self, dn: &str) -> Result<()> {
        let target = dn::normalize(dn)?;

        if let Some(cluster) = &self.cluster_writer {
            let txn = self.storage.begin_read().await?;
            let exists = txn.get(&target).is_ok();
            let has_children = txn.has_children(&target);
            txn.rollback().await?;
            if !exists {
                return Err(crate::error::entry_not_found(target.as_str().to_string()));
            }
            if has_children {
                return Err(not_allowed_on_non_leaf(target.as_str().to_string()));
            }
            cluster.delete(&target).await?;
            self.broker.publish(ChangeOp::Delete, target, None);
            return Ok(());
        }

        let mut txn = self.storage.begin_write().await?;
        if let Err(e) = txn.get(&target) {
            txn.rollback().await?;
            return Err(e);
        }
        if txn.has_children(&target) {
            txn.rollback().await?;
            return Err(not_allowed_on_non_leaf(target.as_str().to_string()));
        }
        txn.delete(&target)?;
        txn.commit().await?;
        self.broker.publish(ChangeOp::Delete, target, None);
        Ok(())
    }

    /// Renames an entry, optionally reparenting it, rewriting every
    /// descendant DN atomically when the entry has children (spec §4.I,
    /// §8 S5). `ClusterWriter` mode always fails `SubtreeMoveUnsupported`
    /// (spec §4.I "Cluster mode").
    pub async fn modify_dn(
        &self,
        dn: &str,
        new_rdn: &str,
        delete_old_rdn: bool,
        new_superior: Option<&str>,
        bind_dn: Option<&str>,
    ) -> Result<()> {
        if self.cluster_writer.is_some() {
            return Err(subtree_move_unsupported(
                "modifyDN through the cluster path is not supported",
            ));
        }

        let modifier = self.bind_dn_or_root(bind_dn)?;
        let old_dn = dn::normalize(dn)?;
        let (new_attr, new_value) = dn::parse_rdn(new_rdn)?;
        let new_parent = match new_superior {
            Some(s) => dn::normalize(s)?,
            None => dn::parent(&old_dn),
        };

        let mut txn = self.storage.begin_write().await?;
        let mut entry = match txn.get(&old_dn) {
            Ok(e) => e,
            Err(e) => {
                txn.rollback().await?;
                return Err(e);
            }
        };

        if !new_parent.is_root() && txn.get(&new_parent).is_err() {
            txn.rollback().await?;
            return Err(new_superior_not_found(new_parent.as_str().to_string()));
        }

        let new_dn = match dn::normalize(&format!("{new_attr}={new_value},{}", new_parent.as_str()))
        {
            Ok(d) => d,
            Err(e) => {
                txn.rollback().await?;
                return Err(e);
            }
        };

        if new_dn != old_dn && txn.get(&new_dn).is_ok() {
            txn.rollback().await?;
            return Err(entry_exists(new_dn.as_str().to_string()));
        }

        if delete_old_rdn {
            if let Ok((old_attr, old_value)) = dn::parse_rdn(&dn::rdn(&old_dn)) {
                entry.delete_value(&old_attr, old_value.as_bytes());
            }
        }
        entry.add(&new_attr, new_value.clone().into_bytes());
        entry.dn = new_dn.clone();

        if let Err(e) = self.schema.validate_entry(&entry) {
            txn.rollback().await?;
            return Err(e);
        }
        if let Err(e) = check_placement(
            &self.schema,
            &new_dn,
            &entry.object_classes(),
            &self.users_base,
            &self.groups_base,
        ) {
            txn.rollback().await?;
            return Err(e);
        }

        let descendants = txn.search_by_dn(&old_dn, Scope::Subtree);
        let child_count = txn.search_by_dn(&old_dn, Scope::One).len();
        op::stamp_for_modify(&mut entry, SystemTime::now(), &modifier, child_count);

        txn.delete(&old_dn)?;
        for descendant in &descendants {
            if descendant.dn == old_dn {
                continue;
            }
            let mut moved = descendant.clone();
            moved.dn = dn::rebase(&descendant.dn, &old_dn, &new_dn);
            txn.delete(&descendant.dn)?;
            txn.put(moved)?;
        }
        txn.put(entry.clone())?;
        txn.commit().await?;

        self.broker
            .publish(ChangeOp::ModifyDn, new_dn, Some(entry_json(&entry)));
        Ok(())
    }

    pub fn watch(&self, filter: SubscriptionFilter) -> Subscription {
        self.broker.subscribe(filter)
    }

    pub fn watch_with_resume(
        &self,
        filter: SubscriptionFilter,
        since_token: u64,
    ) -> Result<Subscription> {
        self.broker.subscribe_with_resume(filter, since_token)
    }

    pub fn unwatch(&self, subscription: &Subscription) {
        subscription.unsubscribe();
    }

    pub fn base_dn(&self) -> &Dn {
        &self.base_dn
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;

    async fn booted_engine() -> Engine {
        Engine::boot(EngineConfig::default(), Box::new(MemoryBackend::in_memory()))
            .await
            .unwrap()
    }

    fn alice_entry() -> Entry {
        let mut e = Entry::new(dn::normalize("uid=alice,ou=users,dc=example,dc=com").unwrap());
        e.set_strings(
            "objectclass",
            vec![
                "inetOrgPerson".to_string(),
                "organizationalPerson".to_string(),
                "person".to_string(),
                "top".to_string(),
            ],
        );
        e.set_strings("cn", vec!["Alice".to_string()]);
        e.set_strings("sn", vec!["Smith".to_string()]);
        e.set_strings("uid", vec!["alice".to_string()]);
        e
    }

    // S1: add/search/delete round trip.
    #[tokio::test]
    async fn s1_add_search_delete_round_trip() {
        let engine = booted_engine().await;
        engine.add(alice_entry(), None).await.unwrap();

        let filter = crate::filter::parser::parse_filter("(uid=ALICE)").unwrap();
        let hits = engine
            .search("dc=example,dc=com", Scope::Subtree, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        let uuid = hits[0].get_first_string("entryuuid").unwrap();
        assert!(uuid::Uuid::parse_str(&uuid).is_ok());

        let err = engine
            .delete("ou=users,dc=example,dc=com")
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::NotAllowedOnNonLeaf);

        engine
            .delete("uid=alice,ou=users,dc=example,dc=com")
            .await
            .unwrap();
        let hits_after = engine
            .search("dc=example,dc=com", Scope::Subtree, Some(&filter))
            .await
            .unwrap();
        assert!(hits_after.is_empty());
    }

    // S2: placement enforcement.
    #[tokio::test]
    async fn s2_placement_enforcement() {
        let engine = booted_engine().await;
        let mut misplaced = alice_entry();
        misplaced.dn = dn::normalize("uid=bob,dc=example,dc=com").unwrap();
        let err = engine.add(misplaced, None).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidPlacement);

        let mut bob = alice_entry();
        bob.dn = dn::normalize("uid=bob,ou=users,dc=example,dc=com").unwrap();
        bob.set_strings("uid", vec!["bob".to_string()]);
        engine.add(bob, None).await.unwrap();
    }

    // S3: lockout cycle with a virtual clock.
    #[tokio::test]
    async fn s3_lockout_cycle() {
        let mut config = EngineConfig::default();
        config.security.rate_limit.max_attempts = 3;
        config.security.rate_limit.lockout_duration = std::time::Duration::from_secs(15 * 60);
        let engine = Engine::boot(config, Box::new(MemoryBackend::in_memory()))
            .await
            .unwrap();

        let mut alice = alice_entry();
        alice.set_strings("userpassword", vec!["correct-horse".to_string()]);
        engine.add(alice, None).await.unwrap();

        let t0 = SystemTime::UNIX_EPOCH;
        for _ in 0..3 {
            let err = engine
                .bind("uid=alice,ou=users,dc=example,dc=com", b"wrong", t0)
                .await
                .unwrap_err();
            assert_eq!(err.kind, crate::error::ErrorKind::InvalidCredentials);
        }

        let err = engine
            .bind(
                "uid=alice,ou=users,dc=example,dc=com",
                b"correct-horse",
                t0,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::AccountLocked);

        let later = t0 + std::time::Duration::from_secs(16 * 60);
        engine
            .bind(
                "uid=alice,ou=users,dc=example,dc=com",
                b"correct-horse",
                later,
            )
            .await
            .unwrap();
    }

    // S5: subtree rename rewrites children.
    #[tokio::test]
    async fn s5_subtree_rename_rewrites_children() {
        let engine = booted_engine().await;
        let mut team = Entry::new(dn::normalize("ou=team,ou=users,dc=example,dc=com").unwrap());
        team.set_strings(
            "objectclass",
            vec!["organizationalUnit".to_string(), "top".to_string()],
        );
        team.set_strings("ou", vec!["team".to_string()]);
        engine.add(team, None).await.unwrap();

        let mut carol = Entry::new(
            dn::normalize("uid=carol,ou=team,ou=users,dc=example,dc=com").unwrap(),
        );
        carol.set_strings(
            "objectclass",
            vec![
                "inetOrgPerson".to_string(),
                "organizationalPerson".to_string(),
                "person".to_string(),
                "top".to_string(),
            ],
        );
        carol.set_strings("cn", vec!["Carol".to_string()]);
        carol.set_strings("sn", vec!["Jones".to_string()]);
        carol.set_strings("uid", vec!["carol".to_string()]);
        engine.add(carol, None).await.unwrap();

        let before = engine
            .search(
                "uid=carol,ou=team,ou=users,dc=example,dc=com",
                Scope::Base,
                None,
            )
            .await
            .unwrap();
        let original_uuid = before[0].get_first_string("entryuuid").unwrap();

        engine
            .modify_dn(
                "ou=team,ou=users,dc=example,dc=com",
                "ou=squad",
                false,
                None,
                None,
            )
            .await
            .unwrap();

        let moved = engine
            .search(
                "uid=carol,ou=squad,ou=users,dc=example,dc=com",
                Scope::Base,
                None,
            )
            .await
            .unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].get_first_string("entryuuid").unwrap(), original_uuid);

        let gone = engine
            .search(
                "uid=carol,ou=team,ou=users,dc=example,dc=com",
                Scope::Base,
                None,
            )
            .await
            .unwrap();
        assert!(gone.is_empty());
    }

    #[tokio::test]
    async fn modify_with_zero_mods_is_a_noop() {
        let engine = booted_engine().await;
        engine.add(alice_entry(), None).await.unwrap();
        engine
            .modify("uid=alice,ou=users,dc=example,dc=com", vec![], None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn watch_with_resume_surfaces_through_engine() {
        let engine = booted_engine().await;
        let filter = SubscriptionFilter::everything();
        let sub = engine.watch(filter.clone());
        engine.add(alice_entry(), None).await.unwrap();
        assert!(sub.try_recv().is_some());

        let resumed = engine.watch_with_resume(filter, 0);
        assert!(resumed.is_ok());
    }
}
