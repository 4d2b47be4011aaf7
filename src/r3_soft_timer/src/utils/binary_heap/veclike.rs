use arrayvec::ArrayVec;
use core::ops;

/// A growable array that a [`BinaryHeap`] can be built on.
///
/// [`BinaryHeap`]: super::BinaryHeap
pub trait VecLike: ops::Deref<Target = [<Self as VecLike>::Element]> + ops::DerefMut {
    // `ArrayVec` doesn't implement `Default` in a `const` context, so the empty
    // value is provided here for the `const fn` constructors of the timer
    // queue
    const DEFAULT: Self;
    type Element;
    fn len(&self) -> usize;
    fn pop(&mut self) -> Option<Self::Element>;
    fn push(&mut self, x: Self::Element);
    fn clear(&mut self);
}

impl<T, const N: usize> VecLike for ArrayVec<T, N> {
    const DEFAULT: Self = Self::new_const();
    type Element = T;
    fn len(&self) -> usize {
        self.len()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    /// Panics if the array is full. The timer pool guarantees that a heap
    /// never holds more than `N` entries.
    fn push(&mut self, x: Self::Element) {
        self.push(x)
    }
    fn clear(&mut self) {
        self.clear()
    }
}

#[cfg(test)]
impl<T> VecLike for Vec<T> {
    const DEFAULT: Self = Vec::new();
    type Element = T;
    fn len(&self) -> usize {
        self.len()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn push(&mut self, x: Self::Element) {
        self.push(x)
    }
    fn clear(&mut self) {
        self.clear()
    }
}
