/// Tab state over a task's drafts. The latest draft is selected by default,
/// and the selection snaps back to it whenever the number of drafts changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftTabs {
    count: usize,
    selected: usize,
    show_diff: bool,
}

impl DraftTabs {
    pub fn sync(&mut self, count: usize) {
        if count != self.count {
            self.count = count;
            self.selected = count.saturating_sub(1);
            if self.previous().is_none() {
                self.show_diff = false;
            }
        }
    }

    pub fn select(&mut self, index: usize) {
        if index < self.count {
            self.selected = index;
            if self.previous().is_none() {
                self.show_diff = false;
            }
        }
    }

    pub fn selected(&self) -> Option<usize> {
        (self.count > 0).then_some(self.selected)
    }

    /// The draft the selected one is compared against.
    pub fn previous(&self) -> Option<usize> {
        self.selected().and_then(|i| i.checked_sub(1))
    }

    pub fn toggle_diff(&mut self) {
        self.show_diff = !self.show_diff && self.previous().is_some();
    }

    pub fn show_diff(&self) -> bool {
        self.show_diff
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

pub fn tab_label(index: usize, count: usize, running: bool) -> String {
    if !running && index + 1 == count {
        return "Answer".to_string();
    }
    if (running && count == 1) || (!running && count == 2) {
        return "Draft".to_string();
    }
    format!("Draft {}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_latest_and_redefaults_on_new_draft() {
        let mut tabs = DraftTabs::default();
        assert_eq!(tabs.selected(), None);

        tabs.sync(2);
        assert_eq!(tabs.selected(), Some(1));
        tabs.select(0);
        assert_eq!(tabs.selected(), Some(0));

        tabs.sync(2);
        assert_eq!(tabs.selected(), Some(0));

        tabs.sync(3);
        assert_eq!(tabs.selected(), Some(2));
    }

    #[test]
    fn out_of_range_selection_is_ignored() {
        let mut tabs = DraftTabs::default();
        tabs.sync(1);
        tabs.select(5);
        assert_eq!(tabs.selected(), Some(0));
    }

    #[test]
    fn diff_needs_a_predecessor() {
        let mut tabs = DraftTabs::default();
        tabs.sync(1);
        tabs.toggle_diff();
        assert!(!tabs.show_diff());

        tabs.sync(2);
        tabs.toggle_diff();
        assert!(tabs.show_diff());
        assert_eq!(tabs.previous(), Some(0));

        tabs.select(0);
        assert!(!tabs.show_diff());
    }

    #[test]
    fn tab_labels() {
        assert_eq!(tab_label(0, 1, true), "Draft");
        assert_eq!(tab_label(0, 2, false), "Draft");
        assert_eq!(tab_label(1, 2, false), "Answer");
        assert_eq!(tab_label(0, 3, true), "Draft 1");
        assert_eq!(tab_label(2, 3, true), "Draft 3");
        assert_eq!(tab_label(1, 3, false), "Draft 2");
    }
}
