//! Cycle detection over an index arena.
//!
//! Iterative depth-first search with three-color marking. A node reached
//! again while it is still on the stack (gray) closes a cycle, and the stack
//! slice from that node onward is the cycle path.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Find a dependency cycle.
///
/// `deps[i]` lists the arena indices node `i` depends on, and `roots` gives
/// the order in which unvisited nodes start a search. Returns the cycle as a
/// list of indices whose first and last entries are the same node.
pub(crate) fn find_cycle(deps: &[Vec<usize>], roots: &[usize]) -> Option<Vec<usize>> {
    let mut color = vec![Color::White; deps.len()];
    // (node, index of the next dependency to visit)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for &root in roots {
        if color[root] != Color::White {
            continue;
        }
        color[root] = Color::Gray;
        stack.push((root, 0));

        while let Some(&(node, cursor)) = stack.last() {
            let Some(&dep) = deps[node].get(cursor) else {
                color[node] = Color::Black;
                stack.pop();
                continue;
            };
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            match color[dep] {
                Color::White => {
                    color[dep] = Color::Gray;
                    stack.push((dep, 0));
                }
                Color::Gray => {
                    let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let mut path: Vec<usize> = stack[start..].iter().map(|&(n, _)| n).collect();
                    path.push(dep);
                    return Some(path);
                }
                Color::Black => {}
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acyclic_graph_has_no_cycle() {
        // 2 -> 1 -> 0, 2 -> 0
        let deps = vec![vec![], vec![0], vec![1, 0]];
        assert_eq!(find_cycle(&deps, &[0, 1, 2]), None);
    }

    #[test]
    fn reports_self_loop() {
        let deps = vec![vec![0]];
        assert_eq!(find_cycle(&deps, &[0]), Some(vec![0, 0]));
    }

    #[test]
    fn reports_only_the_cycle_portion_of_the_stack() {
        // 0 -> 1 -> 2 -> 3 -> 1
        let deps = vec![vec![1], vec![2], vec![3], vec![1]];
        assert_eq!(find_cycle(&deps, &[0, 1, 2, 3]), Some(vec![1, 2, 3, 1]));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        // 3 -> {1, 2} -> 0
        let deps = vec![vec![], vec![0], vec![0], vec![1, 2]];
        assert_eq!(find_cycle(&deps, &[3, 2, 1, 0]), None);
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let n = 100_000;
        let deps: Vec<Vec<usize>> = (0..n)
            .map(|i| if i == 0 { vec![] } else { vec![i - 1] })
            .collect();
        let roots: Vec<usize> = (0..n).rev().collect();
        assert_eq!(find_cycle(&deps, &roots), None);
    }
}
