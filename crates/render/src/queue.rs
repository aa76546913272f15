use crate::renderable::Renderable;

/// Renderables submitted for one frame, drawn in insertion order.
///
/// The queue borrows its renderables, so it cannot outlive the frame that
/// filled it. Nothing is reordered or deduplicated.
#[derive(Default)]
pub struct RenderQueue<'a> {
    items: Vec<&'a dyn Renderable>,
}

impl<'a> RenderQueue<'a> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn add(&mut self, renderable: &'a dyn Renderable) {
        self.items.push(renderable);
    }

    /// Remove the first entry referring to the same object as `renderable`.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, renderable: &dyn Renderable) -> bool {
        let found = self
            .items
            .iter()
            .position(|r| std::ptr::addr_eq(*r, renderable));
        match found {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    /// The next renderable to be drawn, left in place.
    pub fn peek(&self) -> Option<&'a dyn Renderable> {
        self.items.first().copied()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a dyn Renderable> + '_ {
        self.items.iter().copied()
    }
}

impl std::fmt::Debug for RenderQueue<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.items.iter().map(|r| r.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeometryBuffers;
    use crate::renderable::RenderObject;

    fn names(queue: &RenderQueue<'_>) -> Vec<String> {
        queue.iter().map(|r| r.name().to_owned()).collect()
    }

    #[test]
    fn iterates_in_insertion_order() {
        let a = RenderObject::new("a", GeometryBuffers::default());
        let b = RenderObject::new("b", GeometryBuffers::default());
        let mut queue = RenderQueue::new();
        queue.add(&a);
        queue.add(&b);
        assert_eq!(names(&queue), ["a", "b"]);

        assert_eq!(queue.peek().map(|r| r.name()), Some("a"));
        assert_eq!(queue.len(), 2);

        assert!(queue.remove(&a));
        assert_eq!(names(&queue), ["b"]);
    }

    #[test]
    fn duplicates_are_kept() {
        let a = RenderObject::new("a", GeometryBuffers::default());
        let mut queue = RenderQueue::new();
        queue.add(&a);
        queue.add(&a);
        assert_eq!(queue.len(), 2);
        assert!(queue.remove(&a));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_matches_identity_not_name() {
        let a = RenderObject::new("same", GeometryBuffers::default());
        let b = RenderObject::new("same", GeometryBuffers::default());
        let mut queue = RenderQueue::new();
        queue.add(&a);
        assert!(!queue.remove(&b));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn clear_empties() {
        let a = RenderObject::new("a", GeometryBuffers::default());
        let mut queue = RenderQueue::new();
        assert!(queue.is_empty());
        assert!(queue.peek().is_none());
        queue.add(&a);
        queue.clear();
        assert!(queue.is_empty());
    }
}
