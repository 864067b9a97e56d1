//! Contact Registry
//!
//! Contacts are stored per subject. Cascades work on a snapshot taken when
//! they start, so later edits only affect future cascades.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use telemetry::SubjectId;
use tracing::{debug, info};

use crate::contact::{Contact, ContactId};
use crate::RegistryError;

/// Immutable, priority-ordered copy of a subject's contacts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContactSnapshot {
    pub subject_id: SubjectId,
    pub taken_at: DateTime<Utc>,
    contacts: Vec<Contact>,
}

impl ContactSnapshot {
    /// Build a snapshot, ordering by priority rank (stable for ties)
    pub fn new(subject_id: SubjectId, mut contacts: Vec<Contact>) -> Self {
        contacts.sort_by_key(|c| c.priority_rank);
        Self {
            subject_id,
            taken_at: Utc::now(),
            contacts,
        }
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// Registry of notification targets per subject
#[derive(Debug, Default)]
pub struct ContactRegistry {
    contacts: RwLock<HashMap<SubjectId, Vec<Contact>>>,
}

impl ContactRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn check(contact: &Contact) -> Result<(), RegistryError> {
        contact.validate().map_err(|reason| RegistryError::InvalidContact {
            contact: contact.name.clone(),
            reason,
        })
    }

    /// Add one contact to its subject's list
    pub fn add_contact(&self, contact: Contact) -> Result<(), RegistryError> {
        Self::check(&contact)?;
        let mut contacts = self.contacts.write().map_err(poisoned)?;
        let list = contacts.entry(contact.subject_id.clone()).or_default();
        if list.iter().any(|c| c.id == contact.id) {
            return Err(RegistryError::InvalidContact {
                contact: contact.name.clone(),
                reason: format!("id {} already registered", contact.id),
            });
        }

        info!(subject = %contact.subject_id, contact = %contact.name, rank = contact.priority_rank, "Contact added");
        list.push(contact);
        Ok(())
    }

    /// Replace a subject's whole contact list
    ///
    /// The list is validated as a whole; nothing changes if any entry is
    /// rejected.
    pub fn replace_contacts(&self, subject_id: &SubjectId, mut list: Vec<Contact>) -> Result<usize, RegistryError> {
        for contact in list.iter_mut() {
            contact.subject_id = subject_id.clone();
            Self::check(contact)?;
        }
        for (i, contact) in list.iter().enumerate() {
            if list[..i].iter().any(|c| c.id == contact.id) {
                return Err(RegistryError::InvalidContact {
                    contact: contact.name.clone(),
                    reason: format!("id {} listed twice", contact.id),
                });
            }
        }

        let count = list.len();
        self.contacts
            .write()
            .map_err(poisoned)?
            .insert(subject_id.clone(), list);
        info!(subject = %subject_id, count, "Contact list replaced");
        Ok(count)
    }

    /// Remove one contact
    pub fn remove_contact(&self, subject_id: &SubjectId, contact_id: ContactId) -> Result<Contact, RegistryError> {
        let mut contacts = self.contacts.write().map_err(poisoned)?;
        let list = contacts
            .get_mut(subject_id)
            .ok_or(RegistryError::ContactNotFound(contact_id))?;
        let index = list
            .iter()
            .position(|c| c.id == contact_id)
            .ok_or(RegistryError::ContactNotFound(contact_id))?;
        let removed = list.remove(index);
        debug!(subject = %subject_id, contact = %removed.name, "Contact removed");
        Ok(removed)
    }

    /// Drop every contact of a retired subject
    pub fn remove_subject(&self, subject_id: &SubjectId) -> Result<usize, RegistryError> {
        let removed = self
            .contacts
            .write()
            .map_err(poisoned)?
            .remove(subject_id)
            .map(|l| l.len())
            .unwrap_or(0);
        Ok(removed)
    }

    /// Current list in registration order
    pub fn contacts(&self, subject_id: &SubjectId) -> Result<Vec<Contact>, RegistryError> {
        Ok(self
            .contacts
            .read()
            .map_err(poisoned)?
            .get(subject_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Snapshot the subject's contacts for a cascade, in priority order
    pub fn resolve_contacts(&self, subject_id: &SubjectId) -> Result<ContactSnapshot, RegistryError> {
        let list = self.contacts(subject_id)?;
        if list.is_empty() {
            return Err(RegistryError::NoContacts(subject_id.clone()));
        }
        Ok(ContactSnapshot::new(subject_id.clone(), list))
    }
}

fn poisoned<T>(e: std::sync::PoisonError<T>) -> RegistryError {
    RegistryError::StatePoisoned(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::Channel;

    fn subject() -> SubjectId {
        SubjectId::from("TS-001")
    }

    fn contact(name: &str, rank: u32) -> Contact {
        Contact::new(subject(), name, "+910000", vec![Channel::Push, Channel::Sms], rank)
    }

    #[test]
    fn test_resolve_orders_by_rank() {
        let registry = ContactRegistry::new();
        registry.add_contact(contact("Police", 3)).unwrap();
        registry.add_contact(contact("Parent", 1)).unwrap();
        registry.add_contact(contact("Sibling", 1)).unwrap();

        let snapshot = registry.resolve_contacts(&subject()).unwrap();
        let names: Vec<_> = snapshot.contacts().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Parent", "Sibling", "Police"]);
    }

    #[test]
    fn test_no_contacts() {
        let registry = ContactRegistry::new();
        assert!(matches!(
            registry.resolve_contacts(&subject()),
            Err(RegistryError::NoContacts(_))
        ));
    }

    #[test]
    fn test_snapshot_isolated_from_later_edits() {
        let registry = ContactRegistry::new();
        registry.add_contact(contact("Parent", 1)).unwrap();
        let snapshot = registry.resolve_contacts(&subject()).unwrap();

        registry.add_contact(contact("Friend", 2)).unwrap();
        registry.replace_contacts(&subject(), vec![contact("Guide", 1)]).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.contacts()[0].name, "Parent");
        assert_eq!(registry.resolve_contacts(&subject()).unwrap().contacts()[0].name, "Guide");
    }

    #[test]
    fn test_replace_is_all_or_nothing() {
        let registry = ContactRegistry::new();
        registry.add_contact(contact("Parent", 1)).unwrap();

        let bad = Contact::new(subject(), "Nobody", "x", vec![], 2);
        let result = registry.replace_contacts(&subject(), vec![contact("Guide", 1), bad]);
        assert!(matches!(result, Err(RegistryError::InvalidContact { .. })));
        assert_eq!(registry.contacts(&subject()).unwrap()[0].name, "Parent");
    }

    #[test]
    fn test_remove_contact() {
        let registry = ContactRegistry::new();
        let c = contact("Parent", 1);
        let id = c.id;
        registry.add_contact(c.clone()).unwrap();
        assert!(registry.add_contact(c).is_err());

        assert_eq!(registry.remove_contact(&subject(), id).unwrap().name, "Parent");
        assert!(matches!(
            registry.remove_contact(&subject(), id),
            Err(RegistryError::ContactNotFound(_))
        ));
    }
}
