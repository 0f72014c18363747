//! Product FAQ: a fixed list of entries with at most one expanded.

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FaqEntry {
    pub question: &'static str,
    pub answer: &'static str,
}

/// Entries in display order.
pub static FAQ_ENTRIES: [FaqEntry; 6] = [
    FaqEntry {
        question: "What's included in the Premium Sneaker Collection - 5 Pack®?",
        answer: "You get a complete sneaker collection system: 1x Premium Athletic Sneakers (Sizes 6-12), 1x Casual Walking Shoes (All weather protection), 1x High-Performance Running Shoes, 1x Stylish Street Sneakers (Multiple colorways), 1x Limited Edition Designer Kicks, 1x Premium Sneaker Care Kit, plus User's Manual and FREE Online Style Tutorial.",
    },
    FaqEntry {
        question: "Is this suitable for beginners and all activity levels?",
        answer: "Absolutely! Our sneaker collection is designed for everyone from casual walkers to serious athletes. Each pair features different support levels and cushioning systems to match your activity needs and experience level.",
    },
    FaqEntry {
        question: "Can I use these for sports and everyday wear?",
        answer: "Yes! Our versatile collection includes specialized sneakers for running, training, casual wear, and street style. Each pair is engineered for specific activities while maintaining all-day comfort for daily use.",
    },
    FaqEntry {
        question: "How durable are these Premium Sneakers?",
        answer: "Our sneakers are built to last with premium materials, reinforced stitching, and high-quality rubber outsoles. Each pair is designed to withstand daily wear while maintaining their style and performance characteristics.",
    },
    FaqEntry {
        question: "Who can benefit from this premium sneaker collection?",
        answer: "Perfect for athletes, fitness enthusiasts, style-conscious individuals, professionals who walk a lot, students, and anyone who values comfort and quality footwear. Suitable for all ages and activity levels.",
    },
    FaqEntry {
        question: "What's your guarantee policy?",
        answer: "We offer a 30-day satisfaction guarantee and 1-year warranty on manufacturing defects. If you're not completely satisfied with your sneakers, we'll provide a full refund or exchange within 30 days of purchase.",
    },
];

/// One rendered row. `answer` is only present while expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaqItemView {
    pub index: usize,
    pub question: &'static str,
    pub expanded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct FaqAccordion {
    entries: &'static [FaqEntry],
    open: Option<usize>,
}

impl FaqAccordion {
    pub fn new(entries: &'static [FaqEntry]) -> Self {
        Self {
            entries,
            open: None,
        }
    }

    pub fn entries(&self) -> &'static [FaqEntry] {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn open_index(&self) -> Option<usize> {
        self.open
    }

    pub fn is_open(&self, index: usize) -> bool {
        self.open == Some(index)
    }

    /// Expand `index`, or collapse it if it is already the open entry.
    /// Indices past the end of the list are ignored.
    pub fn toggle(&mut self, index: usize) {
        if index >= self.entries.len() {
            debug!(index, len = self.entries.len(), "Ignoring toggle of unknown FAQ entry");
            return;
        }
        self.open = if self.open == Some(index) {
            None
        } else {
            Some(index)
        };
    }

    pub fn view(&self) -> Vec<FaqItemView> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let expanded = self.is_open(index);
                FaqItemView {
                    index,
                    question: entry.question,
                    expanded,
                    answer: expanded.then_some(entry.answer),
                }
            })
            .collect()
    }
}

impl Default for FaqAccordion {
    fn default() -> Self {
        Self::new(&FAQ_ENTRIES)
    }
}
