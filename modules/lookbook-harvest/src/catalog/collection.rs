use lookbook_common::{CatalogId, Entity, RESERVED_ID_BOUNDARY};

use super::error::{CatalogError, Result};

/// Typed list of entities owned by one catalog.
///
/// Every entity in here carries this collection's owner token; taking one out
/// clears it again. Insertion order is kept, snapshot sorting happens at save time.
#[derive(Debug)]
pub struct Collection<T: Entity> {
    owner: CatalogId,
    items: Vec<T>,
}

impl<T: Entity> Collection<T> {
    pub(crate) fn new(owner: CatalogId) -> Self {
        Self {
            owner,
            items: Vec::new(),
        }
    }

    /// Take ownership of a detached entity.
    pub fn add(&mut self, mut item: T) -> Result<&mut T> {
        if let Some(owner) = item.owner() {
            return Err(CatalogError::AlreadyOwned {
                kind: T::KIND,
                id: item.id().to_string(),
                owner,
            });
        }
        let id = item.id();
        if self.contains(&id) {
            return Err(CatalogError::DuplicateId {
                kind: T::KIND,
                id: id.to_string(),
            });
        }
        item.set_owner(Some(self.owner));
        let index = self.items.len();
        self.items.push(item);
        Ok(&mut self.items[index])
    }

    pub fn remove(&mut self, id: &T::Id) -> Option<T> {
        let index = self.position(|e| &e.id() == id)?;
        let mut item = self.items.remove(index);
        item.set_owner(None);
        Some(item)
    }

    /// Remove every entity matching `pred`, returning them detached.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let (mut removed, kept): (Vec<T>, Vec<T>) =
            std::mem::take(&mut self.items).into_iter().partition(|e| pred(e));
        self.items = kept;
        for item in &mut removed {
            item.set_owner(None);
        }
        removed
    }

    /// Drop the current contents and adopt `items` instead.
    pub fn replace_all(&mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.remove_where(|_| true);
        for item in items {
            self.add(item)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.items.iter().find(|e| &e.id() == id)
    }

    pub fn get_mut(&mut self, id: &T::Id) -> Option<&mut T> {
        self.items.iter_mut().find(|e| &e.id() == id)
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.get(id).is_some()
    }

    pub fn find(&self, pred: impl FnMut(&&T) -> bool) -> Option<&T> {
        self.items.iter().find(pred)
    }

    pub fn position(&self, pred: impl FnMut(&T) -> bool) -> Option<usize> {
        self.items.iter().position(pred)
    }

    pub fn at_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn ids(&self) -> Vec<T::Id> {
        self.items.iter().map(|e| e.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Entity<Id = i32>> Collection<T> {
    /// 1 + the highest id below the reserved range, or 1 when there is none.
    pub fn next_id(&self) -> i32 {
        self.items
            .iter()
            .map(|e| e.id())
            .filter(|id| *id < RESERVED_ID_BOUNDARY)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// First entity matching `pred`, or a new one built by `make` from the
    /// next free id. The flag is true when the entity was created.
    pub fn find_or_insert_with(
        &mut self,
        pred: impl FnMut(&T) -> bool,
        make: impl FnOnce(i32) -> T,
    ) -> Result<(&mut T, bool)> {
        match self.items.iter().position(pred) {
            Some(index) => Ok((&mut self.items[index], false)),
            None => {
                let id = self.next_id();
                Ok((self.add(make(id))?, true))
            }
        }
    }
}

impl<'a, T: Entity> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
